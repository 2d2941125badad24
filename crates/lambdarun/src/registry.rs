//! # Lambda Registry
//!
//! The single source of truth for which lambdas exist on an endpoint and how
//! their results are cached.
//!
//! ## Philosophy
//!
//! - **Dense Ids**: Ids are handed out sequentially and never reused while the
//!   registry lives. Unregistering empties a slot; it does not free the id.
//!   Withdrawing the newest registration, one the peer never learned about,
//!   is the only way an id is issued twice.
//! - **Names Are Unique**: Only among lambdas registered at the same time. A
//!   name may be registered again once its previous owner is gone.
//! - **One Handle Per Side**: A device holds the function itself; a host holds
//!   the cache slot and at most one waiting caller.
//!
//! ## Invariants
//! - `count()` is the number of ids issued, including emptied slots.
//! - Name lookup scans in ascending id order and returns the first exact match.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tokio::sync::oneshot;

use lambdapack::CachePolicy;
use lambdapack::LambdaId;
use lambdapack::LambdaType;
use lambdapack::Value;
use lambdapack::MAX_LAMBDAS;
use lambdapack::MAX_NAME_LENGTH;

/// Registration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// Empty, longer than the name field, or not alphanumeric.
    InvalidName,
    /// Another live lambda already has this name.
    Duplicate,
    /// Every id has been issued.
    LimitReached,
    /// The slot table could not grow.
    NoMemory,
}

impl RegisterError {
    /// The numeric code used on the wire and in logs.
    pub fn code(self) -> i8 {
        match self {
            RegisterError::InvalidName => -1,
            RegisterError::Duplicate => -2,
            RegisterError::LimitReached => -3,
            RegisterError::NoMemory => -4,
        }
    }
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::InvalidName => write!(f, "invalid lambda name"),
            RegisterError::Duplicate => write!(f, "a lambda with this name is already registered"),
            RegisterError::LimitReached => write!(f, "all {} lambda ids have been issued", MAX_LAMBDAS),
            RegisterError::NoMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for RegisterError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterError {
    NotFound,
}

impl UnregisterError {
    pub fn code(self) -> i8 {
        -1
    }
}

impl std::fmt::Display for UnregisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no lambda registered under this id")
    }
}

impl std::error::Error for UnregisterError {}

/// A validated lambda name: 1 to 12 ASCII alphanumeric bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LambdaName(String);

impl LambdaName {
    pub fn new(name: &[u8]) -> Result<Self, RegisterError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LENGTH
            && name.iter().all(u8::is_ascii_alphanumeric);
        if !valid {
            return Err(RegisterError::InvalidName);
        }
        // ascii alphanumerics are always valid utf-8
        String::from_utf8(name.to_vec())
            .map(Self)
            .map_err(|_| RegisterError::InvalidName)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for LambdaName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a call on a lambda resolved, as seen by the waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    /// The device answered with an error code.
    Error(i8),
    /// The lambda went away while the caller was waiting.
    Unregistered,
}

/// The caller currently blocked on a lambda.
#[derive(Debug)]
pub struct Waiter {
    pub token: u64,
    pub tx: oneshot::Sender<Outcome>,
}

/// Host-side state of a lambda that lives on the device.
#[derive(Debug, Default)]
pub struct RemoteSlot {
    pub cached: Option<Value>,
    pub waiter: Option<Waiter>,
}

impl RemoteSlot {
    /// Wakes the waiting caller, if any. Returns whether someone was woken.
    pub fn post(&mut self, outcome: Outcome) -> bool {
        match self.waiter.take() {
            Some(waiter) => waiter.tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

pub type LocalFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// What stands behind a registered name.
pub enum LambdaHandle {
    /// The function itself, on the device.
    Local(LocalFn),
    /// The cache and wait slot, on the host.
    Remote(RemoteSlot),
}

impl LambdaHandle {
    pub fn remote() -> Self {
        LambdaHandle::Remote(RemoteSlot::default())
    }

    pub fn remote_ref(&self) -> Option<&RemoteSlot> {
        match self {
            LambdaHandle::Remote(slot) => Some(slot),
            LambdaHandle::Local(_) => None,
        }
    }

    pub fn remote_mut(&mut self) -> Option<&mut RemoteSlot> {
        match self {
            LambdaHandle::Remote(slot) => Some(slot),
            LambdaHandle::Local(_) => None,
        }
    }
}

impl std::fmt::Debug for LambdaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LambdaHandle::Local(_) => write!(f, "Local(<fn>)"),
            LambdaHandle::Remote(slot) => f.debug_tuple("Remote").field(slot).finish(),
        }
    }
}

#[derive(Debug)]
pub struct Lambda {
    pub id: LambdaId,
    pub name: LambdaName,
    pub ty: LambdaType,
    pub cache: CachePolicy,
    pub handle: LambdaHandle,
}

#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Option<Lambda>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a lambda under the next free id.
    ///
    /// Checks run in order: id limit, name validity, name uniqueness, memory.
    pub fn register(
        &mut self,
        name: &[u8],
        ty: LambdaType,
        cache: CachePolicy,
        handle: LambdaHandle,
    ) -> Result<LambdaId, RegisterError> {
        if self.slots.len() >= MAX_LAMBDAS {
            return Err(RegisterError::LimitReached);
        }
        let name = LambdaName::new(name)?;
        if self.find(name.as_bytes()).is_some() {
            return Err(RegisterError::Duplicate);
        }
        self.slots.try_reserve(1).map_err(|_| RegisterError::NoMemory)?;

        let id = self.slots.len() as LambdaId;
        self.slots.push(Some(Lambda { id, name, ty, cache, handle }));
        Ok(id)
    }

    /// Empties the slot for `id`, handing back what was there.
    pub fn unregister(&mut self, id: LambdaId) -> Result<Lambda, UnregisterError> {
        self.slots
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(UnregisterError::NotFound)
    }

    pub fn get(&self, id: LambdaId) -> Option<&Lambda> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: LambdaId) -> Option<&mut Lambda> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    pub fn find(&self, name: &[u8]) -> Option<&Lambda> {
        self.iter().find(|l| l.name.as_bytes() == name)
    }

    pub fn find_mut(&mut self, name: &[u8]) -> Option<&mut Lambda> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|l| l.name.as_bytes() == name)
    }

    /// Number of ids issued so far, emptied slots included.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Live lambdas in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Lambda> {
        self.slots.iter().flatten()
    }

    /// Takes back the most recent registration as if it never happened, so
    /// its id is issued again. Only the newest id can be withdrawn.
    pub fn withdraw(&mut self, id: LambdaId) -> Option<Lambda> {
        if self.slots.len().checked_sub(1) != Some(id as usize) {
            return None;
        }
        self.slots.pop().flatten()
    }

    /// Puts an unregistered lambda back into its emptied slot.
    pub fn restore(&mut self, lambda: Lambda) -> Result<(), Lambda> {
        match self.slots.get_mut(lambda.id as usize) {
            Some(slot @ None) => {
                *slot = Some(lambda);
                Ok(())
            }
            _ => Err(lambda),
        }
    }

    /// Removes everything and restarts id assignment at zero.
    pub fn clear(&mut self) -> Vec<Lambda> {
        self.slots.drain(..).flatten().collect()
    }
}

pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Locks the registry. A panic while the lock was held leaves the table
/// itself consistent, so poisoning is ignored.
pub fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(reg: &mut Registry, name: &str) -> Result<LambdaId, RegisterError> {
        reg.register(name.as_bytes(), LambdaType::Int, CachePolicy::NoCache, LambdaHandle::remote())
    }

    #[test]
    fn test_sequential_ids() {
        let mut reg = Registry::new();
        assert_eq!(register(&mut reg, "kram"), Ok(0));
        assert_eq!(register(&mut reg, "temp"), Ok(1));
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.get(1).map(|l| l.name.as_str()), Some("temp"));
    }

    #[test]
    fn test_name_rules() {
        let mut reg = Registry::new();
        assert_eq!(register(&mut reg, ""), Err(RegisterError::InvalidName));
        assert_eq!(register(&mut reg, "thirteenchars"), Err(RegisterError::InvalidName));
        assert_eq!(register(&mut reg, "\x01"), Err(RegisterError::InvalidName));
        assert_eq!(register(&mut reg, "no_under"), Err(RegisterError::InvalidName));
        assert_eq!(register(&mut reg, "twelvechars1"), Ok(0));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn test_duplicate_then_reuse() {
        let mut reg = Registry::new();
        assert_eq!(register(&mut reg, "kram"), Ok(0));
        assert_eq!(register(&mut reg, "kram"), Err(RegisterError::Duplicate));
        // names are case sensitive
        assert_eq!(register(&mut reg, "KRAM"), Ok(1));

        let gone = reg.unregister(0).unwrap();
        assert_eq!(gone.name.as_str(), "kram");
        assert!(reg.get(0).is_none());
        assert_eq!(reg.unregister(0).unwrap_err(), UnregisterError::NotFound);

        // the id is not reused, the name is
        assert_eq!(register(&mut reg, "kram"), Ok(2));
        assert_eq!(reg.count(), 3);
    }

    #[test]
    fn test_limit_reached_before_name_check() {
        let mut reg = Registry::new();
        for i in 0..MAX_LAMBDAS {
            assert_eq!(register(&mut reg, &format!("l{}", i)), Ok(i as LambdaId));
        }
        assert_eq!(register(&mut reg, "fresh"), Err(RegisterError::LimitReached));
        assert_eq!(register(&mut reg, ""), Err(RegisterError::LimitReached));

        // emptied slots do not give ids back
        reg.unregister(3).unwrap();
        assert_eq!(register(&mut reg, "fresh"), Err(RegisterError::LimitReached));
    }

    #[test]
    fn test_find_and_iter_order() {
        let mut reg = Registry::new();
        for name in ["a", "b", "c"] {
            register(&mut reg, name).unwrap();
        }
        reg.unregister(1).unwrap();

        assert_eq!(reg.find(b"c").map(|l| l.id), Some(2));
        assert!(reg.find(b"b").is_none());
        let ids: Vec<_> = reg.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_clear_resets_ids() {
        let mut reg = Registry::new();
        register(&mut reg, "a").unwrap();
        register(&mut reg, "b").unwrap();
        assert_eq!(reg.clear().len(), 2);
        assert_eq!(reg.count(), 0);
        assert_eq!(register(&mut reg, "b"), Ok(0));
    }

    #[test]
    fn test_withdraw_gives_the_id_back() {
        let mut reg = Registry::new();
        register(&mut reg, "a").unwrap();
        register(&mut reg, "b").unwrap();

        // only the newest id can be withdrawn
        assert!(reg.withdraw(0).is_none());
        assert_eq!(reg.withdraw(1).map(|l| l.name.as_str().to_owned()), Some("b".to_owned()));
        assert_eq!(reg.count(), 1);
        assert!(reg.withdraw(1).is_none());
        assert_eq!(register(&mut reg, "c"), Ok(1));
    }

    #[test]
    fn test_restore_refills_emptied_slot() {
        let mut reg = Registry::new();
        register(&mut reg, "a").unwrap();
        register(&mut reg, "b").unwrap();

        let gone = reg.unregister(0).unwrap();
        assert!(reg.find(b"a").is_none());
        assert!(reg.restore(gone).is_ok());
        assert_eq!(reg.find(b"a").map(|l| l.id), Some(0));

        // an occupied slot refuses
        let stray = Lambda {
            id: 1,
            name: LambdaName::new(b"x").unwrap(),
            ty: LambdaType::Int,
            cache: CachePolicy::NoCache,
            handle: LambdaHandle::remote(),
        };
        assert!(reg.restore(stray).is_err());
        assert_eq!(reg.get(1).map(|l| l.name.as_str()), Some("b"));
    }

    #[test]
    fn test_codes() {
        assert_eq!(RegisterError::InvalidName.code(), -1);
        assert_eq!(RegisterError::Duplicate.code(), -2);
        assert_eq!(RegisterError::LimitReached.code(), -3);
        assert_eq!(RegisterError::NoMemory.code(), -4);
        assert_eq!(UnregisterError::NotFound.code(), -1);
    }

    #[test]
    fn test_post_wakes_waiter_once() {
        let mut slot = RemoteSlot::default();
        assert!(!slot.post(Outcome::Error(-1)));

        let (tx, mut rx) = oneshot::channel();
        slot.waiter = Some(Waiter { token: 1, tx });
        assert!(slot.post(Outcome::Value(Value::Int(42))));
        assert!(slot.waiter.is_none());
        assert_eq!(rx.try_recv().unwrap(), Outcome::Value(Value::Int(42)));
    }
}
