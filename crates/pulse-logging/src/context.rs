//! User context injection for logging
//!
//! Thread-local storage for the user a piece of work is being done for, so
//! every span opened inside the scope can be tagged with `user_id`.

use std::cell::RefCell;

use pulse_core::UserId;
use uuid::Uuid;

/// User context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContextData {
    /// The user's id
    pub user_id: String,
    /// Unique instance ID for this client session
    pub instance_id: Uuid,
}

thread_local! {
    static USER_CONTEXT: RefCell<Option<UserContextData>> = const { RefCell::new(None) };
}

/// RAII guard for user context
///
/// Sets the user context for the current thread; dropping it restores the
/// previous context (if any).
///
/// The context is thread-local. On a multi-threaded runtime a task may resume
/// on another thread after an `.await`, so hold the guard only around
/// synchronous sections or on a current-thread runtime.
///
/// # Example
///
/// ```ignore
/// use pulse_logging::context::UserContextGuard;
/// use pulse_core::UserId;
///
/// let user = UserId::new("alice").unwrap();
/// let _guard = UserContextGuard::new(&user);
///
/// // Spans opened in this scope carry user_id = "alice"
/// tracing::info!("Recording activity");
/// ```
pub struct UserContextGuard {
    previous: Option<UserContextData>,
}

impl UserContextGuard {
    /// Create a new user context guard with a fresh instance ID
    pub fn new(user: &UserId) -> Self {
        Self::with_instance_id(user, Uuid::new_v4())
    }

    /// Create a guard with a specific instance ID
    ///
    /// Useful to keep one instance ID across a client's reconnects.
    pub fn with_instance_id(user: &UserId, instance_id: Uuid) -> Self {
        let previous = USER_CONTEXT.with(|ctx| ctx.borrow().clone());

        let new_ctx = UserContextData {
            user_id: user.as_str().to_string(),
            instance_id,
        };

        USER_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(new_ctx));

        Self { previous }
    }

    /// Get the current user context (if any)
    pub fn current() -> Option<UserContextData> {
        USER_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current user ID (if set)
    pub fn current_user_id() -> Option<String> {
        Self::current().map(|ctx| ctx.user_id)
    }

    /// Get the current instance ID (if set)
    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for UserContextGuard {
    fn drop(&mut self) {
        USER_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Convenience macro to run a block inside a user context
///
/// # Example
///
/// ```ignore
/// with_user_context!(&user, {
///     tracing::info!("Recording activity");
/// });
/// ```
#[macro_export]
macro_rules! with_user_context {
    ($user:expr, $body:block) => {{
        let _guard = $crate::context::UserContextGuard::new($user);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[test]
    fn test_user_context_guard() {
        assert!(UserContextGuard::current().is_none());

        {
            let _guard = UserContextGuard::new(&user("alice"));
            let ctx = UserContextGuard::current().unwrap();
            assert_eq!(ctx.user_id, "alice");
        }

        assert!(UserContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        {
            let _guard_a = UserContextGuard::new(&user("alice"));
            assert_eq!(UserContextGuard::current_user_id(), Some("alice".to_string()));

            {
                let _guard_b = UserContextGuard::new(&user("bob"));
                assert_eq!(UserContextGuard::current_user_id(), Some("bob".to_string()));
            }

            // Restored after the inner guard drops
            assert_eq!(UserContextGuard::current_user_id(), Some("alice".to_string()));
        }

        assert!(UserContextGuard::current_user_id().is_none());
    }

    #[test]
    fn test_with_instance_id() {
        let instance_id = Uuid::new_v4();
        let _guard = UserContextGuard::with_instance_id(&user("carol"), instance_id);
        assert_eq!(UserContextGuard::current_instance_id(), Some(instance_id));
    }

    #[test]
    fn test_macro_scopes_context() {
        let alice = user("alice");
        let seen = with_user_context!(&alice, { UserContextGuard::current_user_id() });
        assert_eq!(seen, Some("alice".to_string()));
        assert!(UserContextGuard::current().is_none());
    }
}
