//! User repository trait and its type-erased wrapper.
//!
//! Compute steps reach the relational store through `BoxUserRepository`,
//! which follows the usual blanket-impl pattern:
//! 1. Define an object-safe `UserRepositoryDyn` trait with boxed futures
//! 2. Blanket-impl `UserRepositoryDyn` for all `T: UserRepository`
//! 3. `BoxUserRepository` wraps `Box<dyn UserRepositoryDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use stepline_types::error::RepositoryError;
use stepline_types::user::{NewUser, User, UserUpdate};

/// Repository trait for user persistence.
pub trait UserRepository: Send + Sync {
    /// Fetch a user by ID.
    fn get_user(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// List users ordered by ID.
    fn list_users(
        &self,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<User>, RepositoryError>> + Send;

    /// Apply a partial update and return the updated user.
    fn update_user(
        &self,
        id: i64,
        update: &UserUpdate,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;

    /// Insert a user. Fails with `Conflict` on a duplicate email.
    fn create_user(
        &self,
        user: &NewUser,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;
}

/// Object-safe version of [`UserRepository`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing
/// `UserRepository`.
pub trait UserRepositoryDyn: Send + Sync {
    fn get_user_boxed(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<User>, RepositoryError>> + Send + '_>>;

    fn list_users_boxed(
        &self,
        limit: u32,
        offset: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<User>, RepositoryError>> + Send + '_>>;

    fn update_user_boxed<'a>(
        &'a self,
        id: i64,
        update: &'a UserUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<User, RepositoryError>> + Send + 'a>>;

    fn create_user_boxed<'a>(
        &'a self,
        user: &'a NewUser,
    ) -> Pin<Box<dyn Future<Output = Result<User, RepositoryError>> + Send + 'a>>;
}

impl<T: UserRepository> UserRepositoryDyn for T {
    fn get_user_boxed(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<User>, RepositoryError>> + Send + '_>> {
        Box::pin(self.get_user(id))
    }

    fn list_users_boxed(
        &self,
        limit: u32,
        offset: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<User>, RepositoryError>> + Send + '_>> {
        Box::pin(self.list_users(limit, offset))
    }

    fn update_user_boxed<'a>(
        &'a self,
        id: i64,
        update: &'a UserUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<User, RepositoryError>> + Send + 'a>> {
        Box::pin(self.update_user(id, update))
    }

    fn create_user_boxed<'a>(
        &'a self,
        user: &'a NewUser,
    ) -> Pin<Box<dyn Future<Output = Result<User, RepositoryError>> + Send + 'a>> {
        Box::pin(self.create_user(user))
    }
}

/// Type-erased user repository handed to compute steps.
///
/// Since `UserRepository` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxUserRepository` provides equivalent methods that delegate to
/// the inner `UserRepositoryDyn` trait object.
pub struct BoxUserRepository {
    inner: Box<dyn UserRepositoryDyn + Send + Sync>,
}

impl BoxUserRepository {
    /// Wrap a concrete `UserRepository` in a type-erased box.
    pub fn new<T: UserRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        self.inner.get_user_boxed(id).await
    }

    pub async fn list_users(&self, limit: u32, offset: u32) -> Result<Vec<User>, RepositoryError> {
        self.inner.list_users_boxed(limit, offset).await
    }

    pub async fn update_user(
        &self,
        id: i64,
        update: &UserUpdate,
    ) -> Result<User, RepositoryError> {
        self.inner.update_user_boxed(id, update).await
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, RepositoryError> {
        self.inner.create_user_boxed(user).await
    }
}

impl std::fmt::Debug for BoxUserRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxUserRepository").finish_non_exhaustive()
    }
}
