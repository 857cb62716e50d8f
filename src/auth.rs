/*!
The auth database: password digests and issued session keys.

This is deliberately a separate database (and separate connection
string) from the data store. The data store knows *who exists*; this
module knows *how they prove it*. Rows are keyed by (role, uname),
where the uname is the person's natural key: email address for
students and teachers, username for admins.

```sql
CREATE TABLE passwords (
    role  TEXT NOT NULL,
    uname TEXT NOT NULL,
    hash  TEXT NOT NULL,    /* argon2id PHC string, salt embedded */
    PRIMARY KEY (role, uname)
);

CREATE TABLE keys (
    key        TEXT PRIMARY KEY,
    role       TEXT NOT NULL,
    uname      TEXT NOT NULL,
    last_touch TIMESTAMPTZ NOT NULL
);
```
*/
use std::fmt::Write;

use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::OsRng,
    },
};
use rand::{Rng, distributions};
use time::{Duration, OffsetDateTime};
use tokio_postgres::{Client, NoTls};

use crate::user::Role;

const DEFAULT_KEY_LENGTH: usize = 32;
const DEFAULT_KEY_CHARS: &str =
"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Keys untouched for this long stop working.
const KEY_LIFETIME: Duration = Duration::hours(24);

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'passwords'",
        "CREATE TABLE passwords (
            role  TEXT NOT NULL,
            uname TEXT NOT NULL,
            hash  TEXT NOT NULL,
            PRIMARY KEY (role, uname)
        )",
        "DROP TABLE passwords",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'keys'",
        "CREATE TABLE keys (
            key        TEXT PRIMARY KEY,
            role       TEXT NOT NULL,
            uname      TEXT NOT NULL,
            last_touch TIMESTAMPTZ NOT NULL
        )",
        "DROP TABLE keys",
    ),
];

#[derive(Debug, PartialEq)]
pub struct AuthError(String);

impl AuthError {
    /// Prepend some contextual `annotation` for the error.
    fn annotate(self, annotation: &str) -> Self {
        let s = format!("{}: {}", annotation, &self.0);
        Self(s)
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<tokio_postgres::error::Error> for AuthError {
    fn from(e: tokio_postgres::error::Error) -> AuthError {
        let mut s = format!("Auth DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            write!(&mut s, "; {}", dbe).unwrap();
        }
        AuthError(s)
    }
}

impl From<String> for AuthError {
    fn from(s: String) -> AuthError { AuthError(s) }
}

/// The possible happy and unhappy outcomes of an auth check.
#[derive(Debug, PartialEq)]
pub enum AuthResult {
    /// The check passed.
    Ok,
    /// The check passed, and here is a freshly-issued session key.
    Key(String),
    BadPassword,
    NoSuchUser,
    InvalidKey,
}

/// Hash `password` into a PHC digest string with a fresh random salt.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError(format!("Unable to hash password: {}", &e)))?
        .to_string();
    Ok(digest)
}

/// Check `password` against a stored PHC digest string.
fn verify_password(password: &str, digest: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(digest)
        .map_err(|e| AuthError(format!("Stored digest unparseable: {}", &e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub struct Db {
    connection_string: String,
    key_chars: Vec<char>,
    key_length: usize,
}

impl Db {
    pub fn new(connection_string: String) -> Self {
        log::trace!("auth::Db::new( {:?} ) called.", &connection_string);

        let key_chars: Vec<char> = DEFAULT_KEY_CHARS.chars().collect();
        let key_length = DEFAULT_KEY_LENGTH;

        Self { connection_string, key_chars, key_length }
    }

    /// Set characters to use when generating session keys.
    ///
    /// Will quietly do nothing if `new_chars` has zero length.
    pub fn set_key_chars(&mut self, new_chars: &str) {
        if !new_chars.is_empty() {
            self.key_chars = new_chars.chars().collect();
        }
    }

    /// Set the length of session keys to generate.
    ///
    /// Will quietly do nothing if set to zero.
    pub fn set_key_length(&mut self, new_length: usize) {
        if new_length > 0 {
            self.key_length = new_length;
        }
    }

    /// Generate a new session key based on the current values of
    /// self.key_chars and self.key_length.
    fn generate_key(&self) -> String {
        // self.key_chars should never have zero length.
        let dist = distributions::Slice::new(&self.key_chars).unwrap();
        let rng = rand::thread_rng();
        let new_key: String = rng.sample_iter(&dist)
            .take(self.key_length)
            .collect();
        new_key
    }

    async fn connect(&self) -> Result<Client, AuthError> {
        log::trace!(
            "auth::Db::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Auth DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let autherr = AuthError::from(e);
                log::trace!("    ...connection failed: {:?}", &autherr);
                Err(autherr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), AuthError> {
        log::trace!("auth::Db::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| AuthError::from(e)
                .annotate("Auth DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(test_stmt.to_owned(), &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(create_stmt.to_owned(), &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| AuthError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look
    at the ERROR level log output when testing to ensure this method did
    its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), AuthError> {
        log::trace!("auth::Db::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = AuthError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err);
            }
        }

        log::trace!("    ...nuking complete.");
        Ok(())
    }

    /// Store a password digest for a new user. Errors if the (role,
    /// uname) pair already has one; that's what `set_password()` is for.
    pub async fn add_user(
        &self,
        role: Role,
        uname: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        log::trace!(
            "auth::Db::add_user( {}, {:?}, [ password ] ) called.",
            &role, uname
        );

        let digest = hash_password(password)?;
        let client = self.connect().await?;

        client.execute(
            "INSERT INTO passwords (role, uname, hash)
                VALUES ($1, $2, $3)",
            &[&role.to_string(), &uname, &digest]
        ).await?;

        Ok(())
    }

    /// Set (or reset) a user's password, dropping any outstanding
    /// session keys so the old credential can't keep a session alive.
    pub async fn set_password(
        &self,
        role: Role,
        uname: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        log::trace!(
            "auth::Db::set_password( {}, {:?}, [ password ] ) called.",
            &role, uname
        );

        let digest = hash_password(password)?;
        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        t.execute(
            "INSERT INTO passwords (role, uname, hash)
                VALUES ($1, $2, $3)
                ON CONFLICT (role, uname) DO UPDATE SET hash = EXCLUDED.hash",
            &[&role.to_string(), &uname, &digest]
        ).await?;
        t.execute(
            "DELETE FROM keys WHERE role = $1 AND uname = $2",
            &[&role.to_string(), &uname]
        ).await?;

        t.commit().await?;
        Ok(())
    }

    /// Remove a user's digest and keys, e.g. when the person record is
    /// deleted from the data store.
    pub async fn delete_user(
        &self,
        role: Role,
        uname: &str,
    ) -> Result<(), AuthError> {
        log::trace!(
            "auth::Db::delete_user( {}, {:?} ) called.", &role, uname
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        t.execute(
            "DELETE FROM keys WHERE role = $1 AND uname = $2",
            &[&role.to_string(), &uname]
        ).await?;
        let n = t.execute(
            "DELETE FROM passwords WHERE role = $1 AND uname = $2",
            &[&role.to_string(), &uname]
        ).await?;

        if n == 0 {
            return Err(AuthError(format!(
                "No auth record for {} {:?}.", &role, uname
            )));
        }

        t.commit().await?;
        Ok(())
    }

    pub async fn check_password(
        &self,
        role: Role,
        uname: &str,
        password: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!(
            "auth::Db::check_password( {}, {:?}, [ password ] ) called.",
            &role, uname
        );

        let client = self.connect().await?;

        let row = match client.query_opt(
            "SELECT hash FROM passwords WHERE role = $1 AND uname = $2",
            &[&role.to_string(), &uname]
        ).await? {
            None => { return Ok(AuthResult::NoSuchUser); },
            Some(row) => row,
        };
        let digest: String = row.try_get("hash")?;

        match verify_password(password, &digest)? {
            true => Ok(AuthResult::Ok),
            false => Ok(AuthResult::BadPassword),
        }
    }

    /// `check_password()`, and on success mint, store, and return a
    /// fresh session key.
    pub async fn check_password_and_issue_key(
        &self,
        role: Role,
        uname: &str,
        password: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!(
            "auth::Db::check_password_and_issue_key( {}, {:?}, [ password ] ) called.",
            &role, uname
        );

        match self.check_password(role, uname, password).await? {
            AuthResult::Ok => {},
            x => { return Ok(x); },
        }

        let key = self.generate_key();
        let client = self.connect().await?;
        client.execute(
            "INSERT INTO keys (key, role, uname, last_touch)
                VALUES ($1, $2, $3, $4)",
            &[&key, &role.to_string(), &uname, &OffsetDateTime::now_utc()]
        ).await?;

        Ok(AuthResult::Key(key))
    }

    /**
    Check that `key` was issued to (role, uname) and hasn't gone stale.

    A live key gets its `last_touch` refreshed; a stale one is removed
    and reported invalid.
    */
    pub async fn check_key(
        &self,
        role: Role,
        uname: &str,
        key: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!(
            "auth::Db::check_key( {}, {:?}, {:?} ) called.",
            &role, uname, key
        );

        let client = self.connect().await?;

        let row = match client.query_opt(
            "SELECT role, uname, last_touch FROM keys WHERE key = $1",
            &[&key]
        ).await? {
            None => { return Ok(AuthResult::InvalidKey); },
            Some(row) => row,
        };

        let key_role: String = row.try_get("role")?;
        let key_uname: String = row.try_get("uname")?;
        if key_role != role.to_string() || key_uname != uname {
            return Ok(AuthResult::InvalidKey);
        }

        let last_touch: OffsetDateTime = row.try_get("last_touch")?;
        if OffsetDateTime::now_utc() - last_touch > KEY_LIFETIME {
            client.execute(
                "DELETE FROM keys WHERE key = $1", &[&key]
            ).await?;
            return Ok(AuthResult::InvalidKey);
        }

        client.execute(
            "UPDATE keys SET last_touch = $1 WHERE key = $2",
            &[&OffsetDateTime::now_utc(), &key]
        ).await?;

        Ok(AuthResult::Ok)
    }

    /// Throw away a session key (logout). Unknown keys are quietly
    /// ignored; the session is just as dead either way.
    pub async fn discard_key(&self, key: &str) -> Result<(), AuthError> {
        log::trace!("auth::Db::discard_key( {:?} ) called.", key);

        let client = self.connect().await?;
        client.execute(
            "DELETE FROM keys WHERE key = $1", &[&key]
        ).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    /*!
    These tests assume the same local Postgres instance as the store
    tests, with write access to a second database:

    ```text
    user: uni_test
    password: uni_test
    database: uni_auth_test
    ```
    */
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    static TEST_CONNECTION: &str = "host=localhost user=uni_test password='uni_test' dbname=uni_auth_test";

    #[test]
    fn password_digests_round_trip() {
        ensure_logging();

        let digest = hash_password("hunter2").unwrap();
        assert!(digest.starts_with("$argon2"));
        assert!(verify_password("hunter2", &digest).unwrap());
        assert!(!verify_password("hunter3", &digest).unwrap());

        // A second digest of the same password gets a different salt.
        let again = hash_password("hunter2").unwrap();
        assert_ne!(digest, again);
        assert!(verify_password("hunter2", &again).unwrap());
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_auth() {
        ensure_logging();
        let db = Db::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn passwords_and_keys() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.add_user(Role::Student, "jsantos@student.edu", "password")
            .await.unwrap();

        assert_eq!(
            db.check_password(Role::Student, "jsantos@student.edu", "password")
                .await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.check_password(Role::Student, "jsantos@student.edu", "wrong")
                .await.unwrap(),
            AuthResult::BadPassword
        );
        assert_eq!(
            db.check_password(Role::Student, "nobody@student.edu", "password")
                .await.unwrap(),
            AuthResult::NoSuchUser
        );
        // Same uname under a different role is a different account.
        assert_eq!(
            db.check_password(Role::Teacher, "jsantos@student.edu", "password")
                .await.unwrap(),
            AuthResult::NoSuchUser
        );

        let key = match db.check_password_and_issue_key(
            Role::Student, "jsantos@student.edu", "password"
        ).await.unwrap() {
            AuthResult::Key(k) => k,
            x => panic!("expected a key, got {:?}", &x),
        };

        assert_eq!(
            db.check_key(Role::Student, "jsantos@student.edu", &key)
                .await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.check_key(Role::Student, "jsantos@student.edu", "nonsense")
                .await.unwrap(),
            AuthResult::InvalidKey
        );
        assert_eq!(
            db.check_key(Role::Teacher, "jsantos@student.edu", &key)
                .await.unwrap(),
            AuthResult::InvalidKey
        );

        // A password reset invalidates outstanding keys.
        db.set_password(Role::Student, "jsantos@student.edu", "better password")
            .await.unwrap();
        assert_eq!(
            db.check_key(Role::Student, "jsantos@student.edu", &key)
                .await.unwrap(),
            AuthResult::InvalidKey
        );
        assert_eq!(
            db.check_password(Role::Student, "jsantos@student.edu", "better password")
                .await.unwrap(),
            AuthResult::Ok
        );

        db.delete_user(Role::Student, "jsantos@student.edu").await.unwrap();
        assert_eq!(
            db.check_password(Role::Student, "jsantos@student.edu", "better password")
                .await.unwrap(),
            AuthResult::NoSuchUser
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn discarded_keys_stop_working() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.add_user(Role::Admin, "root", "toot").await.unwrap();
        let key = match db.check_password_and_issue_key(Role::Admin, "root", "toot")
            .await.unwrap()
        {
            AuthResult::Key(k) => k,
            x => panic!("expected a key, got {:?}", &x),
        };

        assert_eq!(
            db.check_key(Role::Admin, "root", &key).await.unwrap(),
            AuthResult::Ok
        );
        db.discard_key(&key).await.unwrap();
        assert_eq!(
            db.check_key(Role::Admin, "root", &key).await.unwrap(),
            AuthResult::InvalidKey
        );
        // Discarding twice is fine.
        db.discard_key(&key).await.unwrap();

        db.nuke_database().await.unwrap();
    }
}
