/*!
Database interaction module.

The Postgres database to which this connects is meant to have the
following tables.

```sql

CREATE TABLE students (
    id    BIGSERIAL PRIMARY KEY,
    name  TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL
);

CREATE TABLE teachers (
    id    BIGSERIAL PRIMARY KEY,
    name  TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL
);

CREATE TABLE admins (
    id    BIGSERIAL PRIMARY KEY,
    uname TEXT UNIQUE NOT NULL
);

CREATE TABLE courses (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT,
    capacity    INTEGER NOT NULL CHECK (capacity > 0),
    teacher     BIGINT NOT NULL REFERENCES teachers(id)
);

CREATE TABLE enrollments (
    id      BIGSERIAL PRIMARY KEY,
    student BIGINT NOT NULL REFERENCES students(id),
    course  BIGINT NOT NULL REFERENCES courses(id),
    grade   TEXT,   /* NULL until a grade is assigned */
    UNIQUE (student, course)
);
```

Password digests and session keys are *not* here; they belong to the
auth database (see the `auth` module).
*/
use std::fmt::Write;

use tokio_postgres::{Client, NoTls};

pub mod courses;
pub mod enrollments;
pub mod users;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'students'",
        "CREATE TABLE students (
            id    BIGSERIAL PRIMARY KEY,
            name  TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL
        )",
        "DROP TABLE students",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'teachers'",
        "CREATE TABLE teachers (
            id    BIGSERIAL PRIMARY KEY,
            name  TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL
        )",
        "DROP TABLE teachers",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'admins'",
        "CREATE TABLE admins (
            id    BIGSERIAL PRIMARY KEY,
            uname TEXT UNIQUE NOT NULL
        )",
        "DROP TABLE admins",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'courses'",
        "CREATE TABLE courses (
            id          BIGSERIAL PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT,
            capacity    INTEGER NOT NULL CHECK (capacity > 0),
            teacher     BIGINT NOT NULL REFERENCES teachers(id)
        )",
        "DROP TABLE courses",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'enrollments'",
        "CREATE TABLE enrollments (
            id      BIGSERIAL PRIMARY KEY,
            student BIGINT NOT NULL REFERENCES students(id),
            course  BIGINT NOT NULL REFERENCES courses(id),
            grade   TEXT,
            UNIQUE (student, course)
        )",
        "DROP TABLE enrollments",
    ),
];

/**
What can go wrong fielding a request against the store.

Everything here is a local, recoverable condition reported back to the
caller; the handler layer turns each variant into an HTTP status. Only
`Db` represents an actual persistence failure, and the store never
retries those on its own.
*/
#[derive(Debug, PartialEq)]
pub enum StoreError {
    /// The named kind of record ("student", "course", "enrollment")
    /// doesn't exist.
    NotFound(&'static str),
    /// The (student, course) pair already holds an enrollment.
    AlreadyEnrolled,
    /// The course has no seats left.
    CourseFull,
    /// The caller's role or identity doesn't permit the operation.
    Unauthorized,
    /// The request itself is malformed: bad capacity, dangling foreign
    /// reference, duplicate natural key.
    InvalidInput(String),
    /// The database let us down.
    Db(String),
}

impl StoreError {
    /// Prepend some contextual `annotation` for the error.
    ///
    /// Only `Db` errors accumulate context; the other variants are
    /// already self-describing.
    fn annotate(self, annotation: &str) -> Self {
        match self {
            StoreError::Db(s) => StoreError::Db(format!("{}: {}", annotation, &s)),
            e => e,
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        StoreError::InvalidInput(msg.into())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "No such {}.", what),
            StoreError::AlreadyEnrolled => write!(f, "Already enrolled in this course."),
            StoreError::CourseFull => write!(f, "Course is full."),
            StoreError::Unauthorized => write!(f, "Not authorized."),
            StoreError::InvalidInput(msg) => write!(f, "{}", msg),
            StoreError::Db(msg) => write!(f, "Data DB: {}", msg),
        }
    }
}

impl From<tokio_postgres::error::Error> for StoreError {
    fn from(e: tokio_postgres::error::Error) -> StoreError {
        let mut s = format!("{}", &e);
        if let Some(dbe) = e.as_db_error() {
            write!(&mut s, "; {}", dbe).unwrap();
        }
        StoreError::Db(s)
    }
}

impl From<String> for StoreError {
    fn from(s: String) -> StoreError { StoreError::Db(s) }
}

pub struct Store {
    connection_string: String,
}

impl Store {
    pub fn new(connection_string: String) -> Self {
        log::trace!("Store::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    pub(in crate::store) async fn connect(&self) -> Result<Client, StoreError> {
        log::trace!(
            "Store::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = StoreError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), StoreError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| StoreError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

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
            .map_err(|e| StoreError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look
    at the ERROR level log output when testing to ensure this method did
    its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), StoreError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = StoreError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err);
            }
        }

        log::trace!("    ...nuking complete.");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    /*!
    These tests assume you have a Postgres instance running on your local
    machine with resources named according to what you see in the
    `static TEST_CONNECTION &str`:

    ```text
    user: uni_test
    password: uni_test

    with write access to:

    database: uni_store_test
    ```
    */
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    pub static TEST_CONNECTION: &str = "host=localhost user=uni_test password='uni_test' dbname=uni_store_test";

    /**
    This function is for getting the database back in a blank slate state
    if a test panics partway through and leaves it munged.

    ```bash
    cargo test reset_store -- --ignored
    ```
    */
    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_store() {
        ensure_logging();
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn create_store() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        db.nuke_database().await.unwrap();
    }
}
