//! Who is acting, and with which role.
//!
//! Every catalog and allocation operation takes an explicit actor id; the
//! engine turns it into a [`Principal`] through a [`PrincipalResolver`].
//! [`UserDirectory`] is the in-memory resolver used by the host binary and
//! the tests. A real deployment plugs its own identity store in instead.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{Ms, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, user_id: Ulid) -> Option<Principal>;

    /// Display details for summaries. Resolvers without them return `None`.
    fn describe(&self, _user_id: Ulid) -> Option<User> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    pub registered_at: Ms,
}

pub struct UserDirectory {
    users: DashMap<Ulid, User>,
    /// Lowercased email → user id.
    emails: DashMap<String, Ulid>,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        email: &str,
        display_name: &str,
        role: Role,
        now: Ms,
    ) -> Result<User, EngineError> {
        let email = email.trim();
        if email.is_empty() || email.len() > MAX_EMAIL_LEN || !looks_like_email(email) {
            return Err(EngineError::InvalidInput(format!("invalid email: {email:?}")));
        }
        let display_name = display_name.trim();
        if display_name.is_empty() || display_name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(EngineError::InvalidInput("display name must be 1..=100 chars".into()));
        }

        let id = Ulid::new();
        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(_) => {
                return Err(EngineError::Conflict(format!("email already registered: {email}")));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let user = User {
            id,
            email: email.to_string(),
            display_name: display_name.to_string(),
            role,
            active: true,
            registered_at: now,
        };
        self.users.insert(id, user.clone());
        tracing::info!("registered {role:?} user {id}");
        Ok(user)
    }

    pub fn find(&self, id: Ulid) -> Result<User, EngineError> {
        self.users
            .get(&id)
            .map(|u| u.value().clone())
            .ok_or_else(|| EngineError::user_not_found(id))
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.trim().to_lowercase())?.value();
        self.users.get(&id).map(|u| u.value().clone())
    }

    pub fn list_by_role(&self, role: Role) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.role == role)
            .map(|u| u.value().clone())
            .collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn count_by_role(&self, role: Role) -> usize {
        self.users.iter().filter(|u| u.role == role).count()
    }

    pub fn set_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| EngineError::user_not_found(id))?;
        user.active = active;
        Ok(())
    }
}

impl PrincipalResolver for UserDirectory {
    fn resolve(&self, user_id: Ulid) -> Option<Principal> {
        self.users.get(&user_id).map(|u| Principal {
            id: u.id,
            role: u.role,
            active: u.active,
        })
    }

    fn describe(&self, user_id: Ulid) -> Option<User> {
        self.users.get(&user_id).map(|u| u.value().clone())
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve() {
        let dir = UserDirectory::new();
        let user = dir.register("amina@example.ma", "Amina", Role::Organizer, 7).unwrap();

        let p = dir.resolve(user.id).unwrap();
        assert_eq!(p.role, Role::Organizer);
        assert!(p.active);
        assert!(!p.is_admin());
        assert_eq!(dir.find(user.id).unwrap().registered_at, 7);
    }

    #[test]
    fn duplicate_email_is_conflict_case_insensitive() {
        let dir = UserDirectory::new();
        dir.register("Omar@Example.com", "Omar", Role::Client, 0).unwrap();
        let err = dir.register("omar@example.com", "Other", Role::Client, 0).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(dir.find_by_email("OMAR@example.com").unwrap().display_name, "Omar");
    }

    #[test]
    fn malformed_email_rejected() {
        let dir = UserDirectory::new();
        for bad in ["", "no-at-sign", "@example.com", "x@localhost", "x@.com"] {
            let err = dir.register(bad, "Name", Role::Client, 0).unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn blank_name_rejected() {
        let dir = UserDirectory::new();
        let err = dir.register("a@b.co", "   ", Role::Client, 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn deactivate_shows_in_principal() {
        let dir = UserDirectory::new();
        let user = dir.register("a@b.co", "A", Role::Client, 0).unwrap();
        dir.set_active(user.id, false).unwrap();
        assert!(!dir.resolve(user.id).unwrap().active);
        assert!(dir.set_active(Ulid::new(), false).is_err());
    }

    #[test]
    fn role_listing() {
        let dir = UserDirectory::new();
        dir.register("a@b.co", "A", Role::Client, 0).unwrap();
        dir.register("c@d.co", "C", Role::Client, 0).unwrap();
        dir.register("e@f.co", "E", Role::Admin, 0).unwrap();
        assert_eq!(dir.count_by_role(Role::Client), 2);
        assert_eq!(dir.list_by_role(Role::Admin).len(), 1);
        assert_eq!(dir.count_by_role(Role::Organizer), 0);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let dir = UserDirectory::new();
        assert!(dir.resolve(Ulid::new()).is_none());
        assert!(matches!(dir.find(Ulid::new()), Err(EngineError::NotFound { .. })));
    }
}
