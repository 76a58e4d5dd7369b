use std::collections::{BTreeMap, BTreeSet};

use crate::errors::RoomError;

pub type RoomId = i32;
pub type ConnId = i32;

const GLOBAL_ROOM_NAME: &str = "Global Room";
const ID_SEED: RoomId = 0;

/// A named broadcast group. Membership is a set of connection ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub members: BTreeSet<ConnId>,
}

/// Record of one room a departing connection was removed from,
/// used to drive disconnect notices to the rooms that survive.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub room_id: RoomId,
    pub room_name: String,
    pub deleted: bool,
}

/// Owns every room on the server. Room ids are handed out monotonically
/// by a counter scoped to this registry instance, so a deleted id is
/// never resurrected. The global room is created up front and is the
/// one room that survives losing its last member.
pub struct RoomRegistry {
    rooms: BTreeMap<RoomId, Room>,
    next_id: RoomId,
    global_id: RoomId,
}

impl RoomRegistry {
    pub fn new() -> Self {
        let mut registry = RoomRegistry {
            rooms: BTreeMap::new(),
            next_id: ID_SEED,
            global_id: ID_SEED,
        };

        let global_id = registry.create_room(GLOBAL_ROOM_NAME).id;
        registry.global_id = global_id;
        registry
    }

    pub fn global_id(&self) -> RoomId {
        self.global_id
    }

    pub fn create_room(&mut self, name: &str) -> &Room {
        let id = self.next_id;
        self.next_id += 1;

        let room = Room {
            id,
            name: name.to_owned(),
            members: BTreeSet::new(),
        };
        self.rooms.entry(id).or_insert(room)
    }

    // idempotent if the connection is already a member
    pub fn join_room(&mut self, room_id: RoomId, conn_id: ConnId) -> Result<&Room, RoomError> {
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        room.members.insert(conn_id);
        Ok(room)
    }

    /// Removes the member; an emptied room other than the global one is
    /// deleted on the spot.
    pub fn leave_room(&mut self, room_id: RoomId, conn_id: ConnId) -> Result<Departure, RoomError> {
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;

        if !room.members.remove(&conn_id) {
            return Err(RoomError::NotAMember(room_id));
        }

        let room_name = room.name.clone();
        let deleted = room.members.is_empty() && room_id != self.global_id;
        if deleted {
            self.rooms.remove(&room_id);
        }

        Ok(Departure {
            room_id,
            room_name,
            deleted,
        })
    }

    /// Removes the connection from every room it is in, deleting rooms
    /// that empty out (global room excepted). Used on disconnect.
    pub fn remove_member(&mut self, conn_id: ConnId) -> Vec<Departure> {
        let mut departures = Vec::new();

        let joined: Vec<RoomId> = self
            .rooms
            .values()
            .filter(|r| r.members.contains(&conn_id))
            .map(|r| r.id)
            .collect();

        for room_id in joined {
            if let Ok(departure) = self.leave_room(room_id, conn_id) {
                departures.push(departure);
            }
        }

        departures
    }

    pub fn lookup(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn members(&self, room_id: RoomId) -> Result<Vec<ConnId>, RoomError> {
        self.lookup(room_id)
            .map(|r| r.members.iter().copied().collect())
            .ok_or(RoomError::NotFound(room_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_room_exists_at_startup() {
        let registry = RoomRegistry::new();
        let global = registry.lookup(registry.global_id()).expect("global room");
        assert_eq!(global.name, GLOBAL_ROOM_NAME);
        assert!(global.members.is_empty());
    }

    #[test]
    fn room_ids_are_monotonic_and_never_reused() {
        let mut registry = RoomRegistry::new();
        let first = registry.create_room("book-club").id;
        registry.join_room(first, 1).unwrap();
        let departure = registry.leave_room(first, 1).unwrap();
        assert!(departure.deleted);

        // id of the deleted room is not handed out again
        let second = registry.create_room("book-club").id;
        assert!(second > first);
        assert!(registry.lookup(first).is_none());
    }

    #[test]
    fn join_is_idempotent() {
        let mut registry = RoomRegistry::new();
        let id = registry.create_room("quiet").id;
        registry.join_room(id, 5).unwrap();
        let room = registry.join_room(id, 5).unwrap();
        assert_eq!(room.members.len(), 1);
    }

    #[test]
    fn joining_a_nonexistent_room_does_not_mutate_the_registry() {
        let mut registry = RoomRegistry::new();
        let before: Vec<RoomId> = registry.iter().map(|r| r.id).collect();

        assert_eq!(registry.join_room(999, 1), Err(RoomError::NotFound(999)));

        let after: Vec<RoomId> = registry.iter().map(|r| r.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn leaving_requires_membership() {
        let mut registry = RoomRegistry::new();
        let id = registry.create_room("members-only").id;
        registry.join_room(id, 1).unwrap();

        assert_eq!(registry.leave_room(id, 2), Err(RoomError::NotAMember(id)));
        assert_eq!(registry.lookup(id).unwrap().members.len(), 1);
    }

    #[test]
    fn emptied_global_room_survives() {
        let mut registry = RoomRegistry::new();
        let global = registry.global_id();
        registry.join_room(global, 1).unwrap();

        let departure = registry.leave_room(global, 1).unwrap();
        assert!(!departure.deleted);
        assert!(registry.lookup(global).is_some());
    }

    #[test]
    fn remove_member_reports_every_room_and_deletes_emptied_ones() {
        let mut registry = RoomRegistry::new();
        let global = registry.global_id();
        let shared = registry.create_room("shared").id;
        let solo = registry.create_room("solo").id;

        registry.join_room(global, 1).unwrap();
        registry.join_room(shared, 1).unwrap();
        registry.join_room(shared, 2).unwrap();
        registry.join_room(solo, 1).unwrap();

        let mut departures = registry.remove_member(1);
        departures.sort_by_key(|d| d.room_id);

        assert_eq!(departures.len(), 3);
        assert!(!departures[0].deleted); // global survives
        assert!(!departures[1].deleted); // shared still has member 2
        assert!(departures[2].deleted); // solo emptied out

        assert!(registry.lookup(solo).is_none());
        assert_eq!(registry.members(shared).unwrap(), vec![2]);
    }
}
