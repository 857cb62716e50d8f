/*!
`Store` methods for admission, withdrawal, and the grade lifecycle.

Admission is the one spot in the system where naive read-then-write
logic is wrong: two requests racing for the last seat could both pass a
plain count check. `enroll()` therefore runs its existence checks, the
headcount, and the insert in a single transaction that takes a row lock
on the course (`SELECT ... FOR UPDATE`), with the composite UNIQUE
constraint on (student, course) as a backstop, and retries a bounded
number of times if Postgres kills the transaction for deadlock or
serialization trouble.
*/
use tokio_postgres::{Client, Row, error::SqlState};

use super::{Store, StoreError};
use crate::{
    course::{Enrollment, RosterEntry, TranscriptEntry},
    user::{Caller, Role},
};

/// How many times an admission transaction gets re-run before its
/// conflict is reported to the caller.
const ENROLL_ATTEMPTS: usize = 3;

fn retryable(e: &tokio_postgres::error::Error) -> bool {
    matches!(
        e.code(),
        Some(&SqlState::T_R_SERIALIZATION_FAILURE)
            | Some(&SqlState::T_R_DEADLOCK_DETECTED)
    )
}

fn enrollment_from_row(row: &Row) -> Result<Enrollment, StoreError> {
    Ok(Enrollment {
        id: row.try_get("id")?,
        student: row.try_get("student")?,
        course: row.try_get("course")?,
        grade: row.try_get("grade")?,
    })
}

/**
One attempt at the admission transaction.

The outer `Result` is a raw database failure (the caller decides
whether it's worth retrying); the inner one is the admission decision
itself.
*/
async fn enroll_once(
    client: &mut Client,
    student: i64,
    course: i64,
) -> Result<Result<Enrollment, StoreError>, tokio_postgres::error::Error> {
    let t = client.transaction().await?;

    if t.query_opt(
        "SELECT id FROM students WHERE id = $1",
        &[&student]
    ).await?.is_none() {
        return Ok(Err(StoreError::NotFound("student")));
    }

    // Lock the course row for the duration of the transaction.
    // Concurrent admissions to the same course queue up behind this,
    // so the count below can't go stale before the insert lands.
    let row = match t.query_opt(
        "SELECT capacity FROM courses WHERE id = $1 FOR UPDATE",
        &[&course]
    ).await? {
        None => { return Ok(Err(StoreError::NotFound("course"))); },
        Some(row) => row,
    };
    let capacity: i32 = row.try_get("capacity")?;

    if t.query_opt(
        "SELECT id FROM enrollments WHERE student = $1 AND course = $2",
        &[&student, &course]
    ).await?.is_some() {
        return Ok(Err(StoreError::AlreadyEnrolled));
    }

    let row = t.query_one(
        "SELECT COUNT(id) AS enrolled FROM enrollments WHERE course = $1",
        &[&course]
    ).await?;
    let enrolled: i64 = row.try_get("enrolled")?;
    if enrolled >= capacity as i64 {
        return Ok(Err(StoreError::CourseFull));
    }

    let row = t.query_one(
        "INSERT INTO enrollments (student, course)
            VALUES ($1, $2)
            RETURNING id",
        &[&student, &course]
    ).await?;
    let id: i64 = row.try_get("id")?;

    t.commit().await?;

    Ok(Ok(Enrollment { id, student, course, grade: None }))
}

impl Store {
    /**
    Admit `student` to `course`.

    Fails with `NotFound` if either is absent, `AlreadyEnrolled` if the
    pair already holds a seat, and `CourseFull` when the headcount has
    reached capacity. On success the new seat has no grade yet.

    However many admissions race for a course's last seat, exactly one
    of them gets it.
    */
    pub async fn enroll(
        &self,
        student: i64,
        course: i64,
    ) -> Result<Enrollment, StoreError> {
        log::trace!("Store::enroll( {}, {} ) called.", &student, &course);

        let mut client = self.connect().await?;

        let mut attempt: usize = 0;
        loop {
            attempt += 1;
            match enroll_once(&mut client, student, course).await {
                Ok(decision) => { return decision; },
                Err(e) => {
                    if retryable(&e) && attempt < ENROLL_ATTEMPTS {
                        log::warn!(
                            "enroll( {}, {} ) attempt {} conflicted ({}); retrying.",
                            &student, &course, &attempt, &e
                        );
                        continue;
                    }
                    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                        // Somebody else inserted this exact pair between
                        // our check and our insert.
                        return Err(StoreError::AlreadyEnrolled);
                    }
                    return Err(StoreError::from(e)
                        .annotate("Admission transaction failed"));
                },
            }
        }
    }

    /**
    Drop `student`'s seat in `course`.

    Not idempotent: once the seat is gone, asking again is `NotFound`.
    */
    pub async fn withdraw(
        &self,
        student: i64,
        course: i64,
    ) -> Result<(), StoreError> {
        log::trace!("Store::withdraw( {}, {} ) called.", &student, &course);

        let client = self.connect().await?;

        let n = client.execute(
            "DELETE FROM enrollments WHERE student = $1 AND course = $2",
            &[&student, &course]
        ).await?;

        match n {
            0 => Err(StoreError::NotFound("enrollment")),
            _ => Ok(()),
        }
    }

    /// Set or overwrite the grade on `student`'s seat in `course`.
    ///
    /// The grade is stored as the scalar the caller supplied; nobody
    /// here cares whether it reads "95", "A-", or "incomplete".
    pub async fn assign_grade(
        &self,
        caller: &Caller,
        course: i64,
        student: i64,
        grade: &str,
    ) -> Result<Enrollment, StoreError> {
        log::trace!(
            "Store::assign_grade( {:?}, {}, {}, {:?} ) called.",
            caller, &course, &student, grade
        );

        self.set_grade(caller, course, student, Some(grade)).await
    }

    /// Clear the grade on `student`'s seat in `course`, returning it to
    /// the ungraded state.
    pub async fn clear_grade(
        &self,
        caller: &Caller,
        course: i64,
        student: i64,
    ) -> Result<(), StoreError> {
        log::trace!(
            "Store::clear_grade( {:?}, {}, {} ) called.",
            caller, &course, &student
        );

        self.set_grade(caller, course, student, None).await?;
        Ok(())
    }

    /// Common implementation of grade assignment and clearing. Only the
    /// course's owning teacher or an admin may touch a grade.
    async fn set_grade(
        &self,
        caller: &Caller,
        course: i64,
        student: i64,
        grade: Option<&str>,
    ) -> Result<Enrollment, StoreError> {
        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = match t.query_opt(
            "SELECT teacher FROM courses WHERE id = $1",
            &[&course]
        ).await? {
            None => { return Err(StoreError::NotFound("course")); },
            Some(row) => row,
        };
        let owner: i64 = row.try_get("teacher")?;

        match caller.role {
            Role::Admin => { /* Admins may grade anything. */ },
            Role::Teacher if caller.id == owner => { /* Their course. */ },
            _ => { return Err(StoreError::Unauthorized); },
        }

        let row = match t.query_opt(
            "UPDATE enrollments SET grade = $1
                WHERE student = $2 AND course = $3
                RETURNING id, student, course, grade",
            &[&grade, &student, &course]
        ).await? {
            None => { return Err(StoreError::NotFound("enrollment")); },
            Some(row) => row,
        };
        let enr = enrollment_from_row(&row)?;

        t.commit().await?;
        Ok(enr)
    }

    pub async fn get_enrollment(
        &self,
        student: i64,
        course: i64,
    ) -> Result<Option<Enrollment>, StoreError> {
        log::trace!(
            "Store::get_enrollment( {}, {} ) called.", &student, &course
        );

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, student, course, grade FROM enrollments
                WHERE student = $1 AND course = $2",
            &[&student, &course]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(enrollment_from_row(&row)?)),
        }
    }

    /// Fetch a single enrollment by its surrogate id. The admin UI
    /// addresses seats this way.
    pub async fn get_enrollment_by_id(
        &self,
        id: i64,
    ) -> Result<Option<Enrollment>, StoreError> {
        log::trace!("Store::get_enrollment_by_id( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, student, course, grade FROM enrollments
                WHERE id = $1",
            &[&id]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(enrollment_from_row(&row)?)),
        }
    }

    /// Everything one student is enrolled in, with course and teacher
    /// names attached. Backs the student dashboard.
    pub async fn transcript(
        &self,
        student: i64,
    ) -> Result<Vec<TranscriptEntry>, StoreError> {
        log::trace!("Store::transcript( {} ) called.", &student);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT
                courses.id AS course_id,
                courses.name AS course_name,
                teachers.name AS teacher_name,
                enrollments.grade
            FROM
                enrollments
                INNER JOIN courses ON enrollments.course = courses.id
                INNER JOIN teachers ON courses.teacher = teachers.id
            WHERE enrollments.student = $1
            ORDER BY courses.name",
            &[&student]
        ).await?;

        let mut entries: Vec<TranscriptEntry> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            entries.push(TranscriptEntry {
                course_id: row.try_get("course_id")?,
                course_name: row.try_get("course_name")?,
                teacher_name: row.try_get("teacher_name")?,
                grade: row.try_get("grade")?,
            });
        }

        Ok(entries)
    }

    /// The students seated in a course, with their grades. Only the
    /// owning teacher or an admin gets to see it.
    pub async fn roster(
        &self,
        caller: &Caller,
        course: i64,
    ) -> Result<Vec<RosterEntry>, StoreError> {
        log::trace!("Store::roster( {:?}, {} ) called.", caller, &course);

        let client = self.connect().await?;

        let row = match client.query_opt(
            "SELECT teacher FROM courses WHERE id = $1",
            &[&course]
        ).await? {
            None => { return Err(StoreError::NotFound("course")); },
            Some(row) => row,
        };
        let owner: i64 = row.try_get("teacher")?;

        match caller.role {
            Role::Admin => {},
            Role::Teacher if caller.id == owner => {},
            _ => { return Err(StoreError::Unauthorized); },
        }

        let rows = client.query(
            "SELECT
                students.id AS student_id,
                students.name AS student_name,
                enrollments.grade
            FROM
                enrollments
                INNER JOIN students ON enrollments.student = students.id
            WHERE enrollments.course = $1
            ORDER BY students.name",
            &[&course]
        ).await?;

        let mut entries: Vec<RosterEntry> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            entries.push(RosterEntry {
                student_id: row.try_get("student_id")?,
                student_name: row.try_get("student_name")?,
                grade: row.try_get("grade")?,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::TEST_CONNECTION;
    use crate::user::{Caller, Student, Teacher};

    async fn fresh_store() -> Store {
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        db
    }

    async fn seed_teacher(db: &Store) -> Teacher {
        db.insert_teacher("A. Hepworth", "ahepworth@teacher.edu")
            .await.unwrap()
    }

    async fn seed_students(db: &Store, n: usize) -> Vec<Student> {
        let mut studs = Vec::with_capacity(n);
        for i in 0..n {
            let email = format!("student{}@student.edu", i);
            let name = format!("Student {}", i);
            studs.push(db.insert_student(&name, &email).await.unwrap());
        }
        studs
    }

    #[tokio::test]
    #[serial]
    async fn admission_rules() {
        ensure_logging();
        let db = fresh_store().await;
        let admin = Caller::admin(1);

        let teach = seed_teacher(&db).await;
        let studs = seed_students(&db, 2).await;
        let crs = db.create_course(&admin, "Algorithms", None, 1, teach.id)
            .await.unwrap();

        assert_eq!(
            db.enroll(studs[0].id + 100, crs.id).await,
            Err(StoreError::NotFound("student"))
        );
        assert_eq!(
            db.enroll(studs[0].id, crs.id + 100).await,
            Err(StoreError::NotFound("course"))
        );

        let enr = db.enroll(studs[0].id, crs.id).await.unwrap();
        assert_eq!(enr.grade, None);

        // The same pair again is a conflict, not a second seat.
        assert_eq!(
            db.enroll(studs[0].id, crs.id).await,
            Err(StoreError::AlreadyEnrolled)
        );

        // Capacity 1, one seat taken.
        assert_eq!(
            db.enroll(studs[1].id, crs.id).await,
            Err(StoreError::CourseFull)
        );

        // Withdrawing frees the seat for somebody else.
        db.withdraw(studs[0].id, crs.id).await.unwrap();
        assert_eq!(
            db.withdraw(studs[0].id, crs.id).await,
            Err(StoreError::NotFound("enrollment"))
        );
        db.enroll(studs[1].id, crs.id).await.unwrap();

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn grade_lifecycle_and_authorization() {
        ensure_logging();
        let db = fresh_store().await;
        let admin = Caller::admin(1);

        let owner = seed_teacher(&db).await;
        let other = db.insert_teacher("B. Irfan", "birfan@teacher.edu")
            .await.unwrap();
        let studs = seed_students(&db, 1).await;
        let crs = db.create_course(&admin, "Algorithms", None, 10, owner.id)
            .await.unwrap();
        db.enroll(studs[0].id, crs.id).await.unwrap();

        // Only the owning teacher or an admin may grade.
        assert_eq!(
            db.assign_grade(&Caller::teacher(other.id), crs.id, studs[0].id, "A")
                .await,
            Err(StoreError::Unauthorized)
        );
        assert_eq!(
            db.assign_grade(&Caller::student(studs[0].id), crs.id, studs[0].id, "A")
                .await,
            Err(StoreError::Unauthorized)
        );

        let enr = db.assign_grade(&Caller::teacher(owner.id), crs.id, studs[0].id, "A-")
            .await.unwrap();
        assert_eq!(enr.grade.as_deref(), Some("A-"));

        // Admins can overwrite, and numeric text is just as welcome.
        let enr = db.assign_grade(&admin, crs.id, studs[0].id, "92.5")
            .await.unwrap();
        assert_eq!(enr.grade.as_deref(), Some("92.5"));

        db.clear_grade(&Caller::teacher(owner.id), crs.id, studs[0].id)
            .await.unwrap();
        let enr = db.get_enrollment(studs[0].id, crs.id).await.unwrap().unwrap();
        assert_eq!(enr.grade, None);

        // Grading a seat that was never filled, or a course that isn't
        // there, is NotFound.
        assert_eq!(
            db.assign_grade(&admin, crs.id + 100, studs[0].id, "A").await,
            Err(StoreError::NotFound("course"))
        );
        db.withdraw(studs[0].id, crs.id).await.unwrap();
        assert_eq!(
            db.assign_grade(&admin, crs.id, studs[0].id, "A").await,
            Err(StoreError::NotFound("enrollment"))
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn rosters_and_transcripts() {
        ensure_logging();
        let db = fresh_store().await;
        let admin = Caller::admin(1);

        let owner = seed_teacher(&db).await;
        let other = db.insert_teacher("B. Irfan", "birfan@teacher.edu")
            .await.unwrap();
        let studs = seed_students(&db, 2).await;
        let c0 = db.create_course(&admin, "Algorithms", None, 10, owner.id)
            .await.unwrap();
        let c1 = db.create_course(&admin, "Databases", None, 10, other.id)
            .await.unwrap();

        db.enroll(studs[0].id, c0.id).await.unwrap();
        db.enroll(studs[1].id, c0.id).await.unwrap();
        db.enroll(studs[0].id, c1.id).await.unwrap();
        db.assign_grade(&admin, c0.id, studs[0].id, "B+").await.unwrap();

        let roster = db.roster(&Caller::teacher(owner.id), c0.id).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].grade.as_deref(), Some("B+"));
        assert_eq!(roster[1].grade, None);

        assert_eq!(
            db.roster(&Caller::teacher(other.id), c0.id).await,
            Err(StoreError::Unauthorized)
        );

        let transcript = db.transcript(studs[0].id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(&transcript[0].course_name, "Algorithms");
        assert_eq!(&transcript[0].teacher_name, "A. Hepworth");
        assert_eq!(transcript[0].grade.as_deref(), Some("B+"));
        assert_eq!(&transcript[1].course_name, "Databases");
        assert_eq!(transcript[1].grade, None);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn course_delete_cascades() {
        ensure_logging();
        let db = fresh_store().await;
        let admin = Caller::admin(1);

        let teach = seed_teacher(&db).await;
        let studs = seed_students(&db, 3).await;
        let crs = db.create_course(&admin, "Algorithms", None, 10, teach.id)
            .await.unwrap();
        for s in studs.iter() {
            db.enroll(s.id, crs.id).await.unwrap();
        }

        db.delete_course(&admin, crs.id).await.unwrap();

        // No seat survives its course.
        for s in studs.iter() {
            assert_eq!(db.get_enrollment(s.id, crs.id).await.unwrap(), None);
            assert!(db.transcript(s.id).await.unwrap().is_empty());
        }

        db.nuke_database().await.unwrap();
    }

    /**
    The one real race in the system: a pile of concurrent admissions
    against a course with a single open seat. Exactly one must win; the
    rest must see `CourseFull`. Each `enroll()` call opens its own
    connection, so these genuinely contend in Postgres.
    */
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn concurrent_admissions_respect_capacity() {
        ensure_logging();
        let db = Arc::new(fresh_store().await);
        let admin = Caller::admin(1);

        let teach = seed_teacher(&db).await;
        let studs = seed_students(&db, 8).await;
        let crs = db.create_course(&admin, "Tiny Seminar", None, 1, teach.id)
            .await.unwrap();

        let mut handles = Vec::with_capacity(studs.len());
        for s in studs.iter() {
            let db = db.clone();
            let (sid, cid) = (s.id, crs.id);
            handles.push(tokio::spawn(async move {
                db.enroll(sid, cid).await
            }));
        }

        let mut n_ok: usize = 0;
        let mut n_full: usize = 0;
        for h in handles.drain(..) {
            match h.await.unwrap() {
                Ok(_) => { n_ok += 1; },
                Err(StoreError::CourseFull) => { n_full += 1; },
                Err(e) => { panic!("unexpected admission failure: {:?}", &e); },
            }
        }
        assert_eq!(n_ok, 1);
        assert_eq!(n_full, studs.len() - 1);

        let occ = db.course_occupancy().await.unwrap();
        assert_eq!(occ[0].enrolled, 1);
        assert!(!occ[0].overbooked());

        db.nuke_database().await.unwrap();
    }

    /// Same contention shape, wider door: capacity 3, eight hopefuls.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn concurrent_admissions_fill_to_capacity() {
        ensure_logging();
        let db = Arc::new(fresh_store().await);
        let admin = Caller::admin(1);

        let teach = seed_teacher(&db).await;
        let studs = seed_students(&db, 8).await;
        let crs = db.create_course(&admin, "Small Seminar", None, 3, teach.id)
            .await.unwrap();

        let mut handles = Vec::with_capacity(studs.len());
        for s in studs.iter() {
            let db = db.clone();
            let (sid, cid) = (s.id, crs.id);
            handles.push(tokio::spawn(async move {
                db.enroll(sid, cid).await
            }));
        }

        let mut n_ok: usize = 0;
        for h in handles.drain(..) {
            match h.await.unwrap() {
                Ok(_) => { n_ok += 1; },
                Err(StoreError::CourseFull) => {},
                Err(e) => { panic!("unexpected admission failure: {:?}", &e); },
            }
        }
        assert_eq!(n_ok, 3);

        let occ = db.course_occupancy().await.unwrap();
        assert_eq!(occ[0].enrolled, 3);

        db.nuke_database().await.unwrap();
    }
}
