//! The users/channels world model (part of component C2).
//!
//! Grounded on spec.md §9's design note: the original client stored raw
//! pointers from `Channel.members` back to `User` objects and GC'd users by
//! back-scanning every channel. This module takes the note's suggested
//! "safe re-architecture" literally: users live in a slab (`Arena`) indexed
//! by a stable [`UserId`], channel membership stores `UserId`s, and GC is a
//! decrement-and-sweep over the arena with no cyclic ownership.
//!
//! The slab/arena shape itself is grounded on `vinezombie::util::flatmap`
//! and `thinarc`-style small-index-based collections the teacher uses to
//! avoid pointer-chasing; this version is a plain `Vec<Option<T>>` slab
//! since the scale here (users-per-network) does not call for anything
//! fancier.

use crate::ircmsg::Prefix;
use crate::string::Casemapping;
use std::collections::HashMap;

/// A stable identifier for a [`User`] within one session's world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct UserId(usize);

/// A known participant, per spec.md §3.
#[derive(Clone, Debug)]
pub struct User {
    pub prefix: Prefix,
    pub away_message: Option<String>,
    pub account: Option<String>,
    pub realname: Option<String>,
}

impl User {
    fn new(prefix: Prefix) -> Self {
        User { prefix, away_message: None, account: None, realname: None }
    }

    /// The display-case nickname.
    pub fn nick(&self) -> &str {
        &self.prefix.name
    }
}

/// A joined channel, per spec.md §3.
#[derive(Clone, Debug)]
pub struct Channel {
    pub name: String,
    pub members: HashMap<UserId, String>,
    pub topic: Option<String>,
    pub topic_setter: Option<String>,
    pub topic_time: Option<std::time::SystemTime>,
    pub complete: bool,
}

impl Channel {
    fn new(name: String) -> Self {
        Channel {
            name,
            members: HashMap::new(),
            topic: None,
            topic_setter: None,
            topic_time: None,
            complete: false,
        }
    }
}

/// The users/channels world for one network session.
///
/// Invariants upheld by this type (spec.md §3, §8 "User GC" /
/// "Channel completeness"):
/// - every key in a `Channel.members` map is a live entry in the arena;
/// - a user exists in the arena iff it is ourself or it appears in some
///   channel's members;
/// - `Channel.name` preserves original casing; the map key is casemapped.
#[derive(Debug)]
pub struct World {
    casemapping: Casemapping,
    arena: Vec<Option<User>>,
    free: Vec<usize>,
    by_key: HashMap<String, UserId>,
    membership_count: HashMap<UserId, usize>,
    self_id: Option<UserId>,
    channels: HashMap<String, Channel>,
}

impl World {
    pub fn new(casemapping: Casemapping) -> Self {
        World {
            casemapping,
            arena: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            membership_count: HashMap::new(),
            self_id: None,
            channels: HashMap::new(),
        }
    }

    pub fn set_casemapping(&mut self, casemapping: Casemapping) {
        self.casemapping = casemapping;
    }

    pub fn casemap(&self, name: &str) -> String {
        self.casemapping.casemap(name)
    }

    /// Marks `nick` as ourself, creating the user if it does not exist.
    /// Ourself is never garbage-collected.
    pub fn set_self(&mut self, prefix: Prefix) -> UserId {
        let id = self.upsert(prefix);
        self.self_id = Some(id);
        id
    }

    pub fn self_id(&self) -> Option<UserId> {
        self.self_id
    }

    pub fn is_self(&self, id: UserId) -> bool {
        self.self_id == Some(id)
    }

    /// Looks up a user by casemapped name.
    pub fn find(&self, name: &str) -> Option<UserId> {
        self.by_key.get(&self.casemap(name)).copied()
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.arena.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.arena.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Inserts a user if absent (by casemapped name), else returns the
    /// existing id. Does not touch membership refcounts.
    pub fn upsert(&mut self, prefix: Prefix) -> UserId {
        let key = self.casemap(&prefix.name);
        if let Some(&id) = self.by_key.get(&key) {
            // Refresh display-case / user / host in case they changed
            // (e.g. via CHGHOST or a fuller prefix arriving later).
            if let Some(user) = self.user_mut(id) {
                user.prefix.name = prefix.name;
                if prefix.user.is_some() {
                    user.prefix.user = prefix.user;
                }
                if prefix.host.is_some() {
                    user.prefix.host = prefix.host;
                }
            }
            return id;
        }
        let id = if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(User::new(prefix));
            UserId(idx)
        } else {
            self.arena.push(Some(User::new(prefix)));
            UserId(self.arena.len() - 1)
        };
        self.by_key.insert(key, id);
        self.membership_count.insert(id, 0);
        id
    }

    /// Renames a user, rekeying the lookup map. Returns `false` if `id`
    /// does not exist.
    pub fn rename(&mut self, id: UserId, new_name: &str) -> bool {
        let Some(user) = self.user(id) else { return false };
        let old_key = self.casemap(&user.prefix.name.clone());
        self.by_key.remove(&old_key);
        let new_key = self.casemap(new_name);
        if let Some(user) = self.user_mut(id) {
            user.prefix.name = new_name.to_string();
        }
        self.by_key.insert(new_key, id);
        true
    }

    fn remove_user(&mut self, id: UserId) {
        if let Some(slot) = self.arena.get_mut(id.0) {
            if let Some(user) = slot.take() {
                let key = self.casemap(&user.prefix.name);
                self.by_key.remove(&key);
            }
        }
        self.membership_count.remove(&id);
        self.free.push(id.0);
    }

    /// Garbage-collects `id` if it is not ourself and belongs to no
    /// channel.
    fn maybe_gc(&mut self, id: UserId) {
        if self.is_self(id) {
            return;
        }
        if self.membership_count.get(&id).copied().unwrap_or(0) == 0 {
            self.remove_user(id);
        }
    }

    pub fn channel(&self, key: &str) -> Option<&Channel> {
        self.channels.get(key)
    }

    pub fn channel_mut(&mut self, key: &str) -> Option<&mut Channel> {
        self.channels.get_mut(key)
    }

    pub fn channel_by_display(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.casemap(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &Channel)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Creates an empty, incomplete channel (self-JOIN).
    pub fn create_channel(&mut self, name: &str) {
        let key = self.casemap(name);
        self.channels.entry(key).or_insert_with(|| Channel::new(name.to_string()));
    }

    /// Adds `id` to `channel` with the given power-level symbol string,
    /// creating the channel entry if absent (should already exist from a
    /// self-JOIN, but tolerate otherwise-ordered servers).
    pub fn join(&mut self, channel_key: &str, channel_display: &str, id: UserId, power: String) {
        let entry =
            self.channels.entry(channel_key.to_string()).or_insert_with(|| Channel::new(channel_display.to_string()));
        if entry.members.insert(id, power).is_none() {
            *self.membership_count.entry(id).or_insert(0) += 1;
        }
    }

    /// Removes `id` from `channel`, GC'ing the user if now orphaned.
    /// Returns `true` if the user had been a member.
    pub fn part(&mut self, channel_key: &str, id: UserId) -> bool {
        let Some(channel) = self.channels.get_mut(channel_key) else { return false };
        let was_member = channel.members.remove(&id).is_some();
        if was_member {
            if let Some(count) = self.membership_count.get_mut(&id) {
                *count = count.saturating_sub(1);
            }
            self.maybe_gc(id);
        }
        was_member
    }

    /// Destroys a channel entirely (self-PART/KICK), decrementing and
    /// sweeping every member.
    pub fn destroy_channel(&mut self, channel_key: &str) {
        if let Some(channel) = self.channels.remove(channel_key) {
            for id in channel.members.into_keys() {
                if let Some(count) = self.membership_count.get_mut(&id) {
                    *count = count.saturating_sub(1);
                }
                self.maybe_gc(id);
            }
        }
    }

    /// Removes `id` from every channel it belongs to (QUIT), returning the
    /// casemapped keys of channels it was in.
    pub fn quit(&mut self, id: UserId) -> Vec<String> {
        let mut left = Vec::new();
        for (key, channel) in self.channels.iter_mut() {
            if channel.members.remove(&id).is_some() {
                left.push(key.clone());
            }
        }
        self.membership_count.insert(id, 0);
        self.maybe_gc(id);
        left
    }

    /// Returns `true` if `id` exists in the arena.
    pub fn contains(&self, id: UserId) -> bool {
        self.arena.get(id.0).map(|s| s.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(name: &str) -> Prefix {
        Prefix { name: name.to_string(), user: None, host: None }
    }

    #[test]
    fn user_gc_after_join_part() {
        let mut world = World::new(Casemapping::Rfc1459);
        let me = world.set_self(prefix("alice"));
        let bob = world.upsert(prefix("bob"));
        world.create_channel("#x");
        world.join("#x", "#x", me, String::new());
        world.join("#x", "#x", bob, String::new());
        assert!(world.contains(bob));
        assert!(world.part("#x", bob));
        assert!(!world.contains(bob), "bob should be GC'd once in no channels");
        assert!(world.contains(me), "self is never GC'd");
    }

    #[test]
    fn user_survives_while_in_any_channel() {
        let mut world = World::new(Casemapping::Rfc1459);
        let bob = world.upsert(prefix("bob"));
        world.create_channel("#a");
        world.create_channel("#b");
        world.join("#a", "#a", bob, String::new());
        world.join("#b", "#b", bob, String::new());
        world.part("#a", bob);
        assert!(world.contains(bob));
        world.part("#b", bob);
        assert!(!world.contains(bob));
    }

    #[test]
    fn destroy_channel_gcs_all_members() {
        let mut world = World::new(Casemapping::Rfc1459);
        let bob = world.upsert(prefix("bob"));
        let carol = world.upsert(prefix("carol"));
        world.create_channel("#x");
        world.join("#x", "#x", bob, String::new());
        world.join("#x", "#x", carol, String::new());
        world.destroy_channel("#x");
        assert!(!world.contains(bob));
        assert!(!world.contains(carol));
    }

    #[test]
    fn quit_removes_from_all_channels_and_gcs() {
        let mut world = World::new(Casemapping::Rfc1459);
        let bob = world.upsert(prefix("bob"));
        world.create_channel("#a");
        world.create_channel("#b");
        world.join("#a", "#a", bob, String::new());
        world.join("#b", "#b", bob, String::new());
        let left = world.quit(bob);
        assert_eq!(left.len(), 2);
        assert!(!world.contains(bob));
    }

    #[test]
    fn rename_rekeys_lookup() {
        let mut world = World::new(Casemapping::Rfc1459);
        let bob = world.upsert(prefix("bob"));
        assert!(world.rename(bob, "bobby"));
        assert_eq!(world.find("bob"), None);
        assert_eq!(world.find("bobby"), Some(bob));
    }

    #[test]
    fn channel_name_preserves_display_case() {
        let mut world = World::new(Casemapping::Rfc1459);
        world.create_channel("#MyChan");
        let chan = world.channel_by_display("#mychan").unwrap();
        assert_eq!(chan.name, "#MyChan");
    }
}
