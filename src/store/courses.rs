/*!
`Store` methods for course creation, editing, deletion, and the
occupancy listings built from courses and their enrollments.

Course management is an admin power, so each mutating method takes the
`Caller` on whose behalf the request is made and refuses anyone else.
*/
use tokio_postgres::Row;

use super::{Store, StoreError};
use crate::{
    course::{Course, CoursePatch, Occupancy},
    user::{Caller, Role},
};

fn course_from_row(row: &Row) -> Result<Course, StoreError> {
    Ok(Course {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        capacity: row.try_get("capacity")?,
        teacher: row.try_get("teacher")?,
    })
}

fn occupancy_from_row(row: &Row) -> Result<Occupancy, StoreError> {
    Ok(Occupancy {
        course: course_from_row(row)?,
        teacher_name: row.try_get("teacher_name")?,
        enrolled: row.try_get("enrolled")?,
    })
}

impl Store {
    pub async fn create_course(
        &self,
        caller: &Caller,
        name: &str,
        description: Option<&str>,
        capacity: i32,
        teacher: i64,
    ) -> Result<Course, StoreError> {
        log::trace!(
            "Store::create_course( {:?}, {:?}, {:?}, {}, {} ) called.",
            caller, name, description, &capacity, &teacher
        );

        if caller.role != Role::Admin {
            return Err(StoreError::Unauthorized);
        }
        if name.is_empty() {
            return Err(StoreError::invalid("Course name must not be empty."));
        }
        if capacity < 1 {
            return Err(StoreError::invalid(format!(
                "Course capacity must be positive, not {}.", &capacity
            )));
        }

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let teacher_row = t.query_opt(
            "SELECT id FROM teachers WHERE id = $1",
            &[&teacher]
        ).await?;
        if teacher_row.is_none() {
            return Err(StoreError::invalid(format!(
                "No teacher with id {}.", &teacher
            )));
        }

        let row = t.query_one(
            "INSERT INTO courses (name, description, capacity, teacher)
                VALUES ($1, $2, $3, $4)
                RETURNING id",
            &[&name, &description, &capacity, &teacher]
        ).await?;
        let id: i64 = row.try_get("id")?;

        t.commit().await?;
        log::trace!("Inserted Course {:?} (id {}).", name, &id);

        Ok(Course {
            id,
            name: name.to_owned(),
            description: description.map(|d| d.to_owned()),
            capacity,
            teacher,
        })
    }

    pub async fn get_course(
        &self,
        id: i64
    ) -> Result<Option<Course>, StoreError> {
        log::trace!("Store::get_course( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, description, capacity, teacher
                FROM courses WHERE id = $1",
            &[&id]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(course_from_row(&row)?)),
        }
    }

    /**
    Apply an admin's partial edit to a course.

    A supplied `teacher` must resolve to an existing teacher and a
    supplied `capacity` must be positive, but a new capacity below the
    course's current headcount is accepted as-is: the course just reads
    as overbooked afterward, and nobody is evicted.
    */
    pub async fn update_course(
        &self,
        caller: &Caller,
        id: i64,
        patch: &CoursePatch,
    ) -> Result<Course, StoreError> {
        log::trace!(
            "Store::update_course( {:?}, {}, {:?} ) called.",
            caller, &id, patch
        );

        if caller.role != Role::Admin {
            return Err(StoreError::Unauthorized);
        }
        if let Some(c) = patch.capacity {
            if c < 1 {
                return Err(StoreError::invalid(format!(
                    "Course capacity must be positive, not {}.", &c
                )));
            }
        }

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = match t.query_opt(
            "SELECT id, name, description, capacity, teacher
                FROM courses WHERE id = $1
                FOR UPDATE",
            &[&id]
        ).await? {
            None => { return Err(StoreError::NotFound("course")); },
            Some(row) => row,
        };
        let mut crs = course_from_row(&row)?;

        if let Some(name) = &patch.name {
            crs.name = name.clone();
        }
        if let Some(description) = &patch.description {
            crs.description = Some(description.clone());
        }
        if let Some(capacity) = patch.capacity {
            crs.capacity = capacity;
        }
        if let Some(teacher) = patch.teacher {
            let teacher_row = t.query_opt(
                "SELECT id FROM teachers WHERE id = $1",
                &[&teacher]
            ).await?;
            if teacher_row.is_none() {
                return Err(StoreError::invalid(format!(
                    "No teacher with id {}.", &teacher
                )));
            }
            crs.teacher = teacher;
        }

        t.execute(
            "UPDATE courses SET
                name = $1, description = $2, capacity = $3, teacher = $4
            WHERE id = $5",
            &[&crs.name, &crs.description, &crs.capacity, &crs.teacher, &crs.id]
        ).await?;

        t.commit().await?;
        Ok(crs)
    }

    /**
    Deletes a course and every enrollment referencing it.

    The two deletes share one transaction; there is no state in which
    the course is gone but orphaned enrollments remain.
    */
    pub async fn delete_course(
        &self,
        caller: &Caller,
        id: i64,
    ) -> Result<(), StoreError> {
        log::trace!("Store::delete_course( {:?}, {} ) called.", caller, &id);

        if caller.role != Role::Admin {
            return Err(StoreError::Unauthorized);
        }

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let n = t.execute(
            "DELETE FROM enrollments WHERE course = $1",
            &[&id]
        ).await?;
        if n > 0 {
            log::trace!("Deleted {} enrollments of course {}.", &n, &id);
        }

        let n = t.execute(
            "DELETE FROM courses WHERE id = $1",
            &[&id]
        ).await?;
        if n == 0 {
            return Err(StoreError::NotFound("course"));
        }

        t.commit().await?;
        Ok(())
    }

    /**
    Every course, with its owning teacher's name and current headcount.

    This hits the database fresh on each call; nothing is cached, so the
    counts are as current as the moment of the query.
    */
    pub async fn course_occupancy(&self) -> Result<Vec<Occupancy>, StoreError> {
        log::trace!("Store::course_occupancy() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT
                courses.id, courses.name, courses.description,
                courses.capacity, courses.teacher,
                teachers.name AS teacher_name,
                COUNT(enrollments.id) AS enrolled
            FROM
                courses
                INNER JOIN teachers ON courses.teacher = teachers.id
                LEFT JOIN enrollments ON enrollments.course = courses.id
            GROUP BY courses.id, teachers.name
            ORDER BY courses.name",
            &[]
        ).await?;

        let mut occupancies: Vec<Occupancy> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            occupancies.push(occupancy_from_row(row)?);
        }

        Ok(occupancies)
    }

    /// Like `course_occupancy()`, restricted to the courses one teacher
    /// owns. Backs the teacher dashboard.
    pub async fn course_occupancy_by_teacher(
        &self,
        teacher: i64
    ) -> Result<Vec<Occupancy>, StoreError> {
        log::trace!(
            "Store::course_occupancy_by_teacher( {} ) called.", &teacher
        );

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT
                courses.id, courses.name, courses.description,
                courses.capacity, courses.teacher,
                teachers.name AS teacher_name,
                COUNT(enrollments.id) AS enrolled
            FROM
                courses
                INNER JOIN teachers ON courses.teacher = teachers.id
                LEFT JOIN enrollments ON enrollments.course = courses.id
            WHERE courses.teacher = $1
            GROUP BY courses.id, teachers.name
            ORDER BY courses.name",
            &[&teacher]
        ).await?;

        let mut occupancies: Vec<Occupancy> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            occupancies.push(occupancy_from_row(row)?);
        }

        Ok(occupancies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::TEST_CONNECTION;
    use crate::user::Caller;

    async fn fresh_store() -> Store {
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        db
    }

    #[tokio::test]
    #[serial]
    async fn create_course_validation() {
        ensure_logging();
        let db = fresh_store().await;

        let teach = db.insert_teacher("A. Hepworth", "ahepworth@teacher.edu")
            .await.unwrap();
        let admin = Caller::admin(1);

        assert_eq!(
            db.create_course(&admin, "Data Structures", None, 0, teach.id)
                .await,
            Err(StoreError::invalid(
                "Course capacity must be positive, not 0."
            ))
        );
        assert!(matches!(
            db.create_course(&admin, "Data Structures", None, 30, teach.id + 1)
                .await,
            Err(StoreError::InvalidInput(_))
        ));
        assert_eq!(
            db.create_course(
                &Caller::teacher(teach.id), "Data Structures", None, 30, teach.id
            ).await,
            Err(StoreError::Unauthorized)
        );

        let crs = db.create_course(
            &admin, "Data Structures", Some("Lists, trees, graphs."), 30, teach.id
        ).await.unwrap();
        assert_eq!(crs.capacity, 30);
        assert_eq!(crs.teacher, teach.id);

        let fetched = db.get_course(crs.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, crs.name);
        assert_eq!(fetched.description.as_deref(), Some("Lists, trees, graphs."));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn update_and_delete_course() {
        ensure_logging();
        let db = fresh_store().await;

        let t0 = db.insert_teacher("A. Hepworth", "ahepworth@teacher.edu")
            .await.unwrap();
        let t1 = db.insert_teacher("B. Irfan", "birfan@teacher.edu")
            .await.unwrap();
        let admin = Caller::admin(1);

        let crs = db.create_course(&admin, "Algorithms", None, 20, t0.id)
            .await.unwrap();

        let patch = CoursePatch {
            name: Some("Advanced Algorithms".to_owned()),
            capacity: Some(10),
            teacher: Some(t1.id),
            ..Default::default()
        };
        let crs = db.update_course(&admin, crs.id, &patch).await.unwrap();
        assert_eq!(&crs.name, "Advanced Algorithms");
        assert_eq!(crs.capacity, 10);
        assert_eq!(crs.teacher, t1.id);

        assert_eq!(
            db.update_course(&Caller::student(3), crs.id, &patch).await,
            Err(StoreError::Unauthorized)
        );
        assert_eq!(
            db.update_course(&admin, crs.id + 1, &patch).await,
            Err(StoreError::NotFound("course"))
        );
        assert!(matches!(
            db.update_course(&admin, crs.id, &CoursePatch {
                teacher: Some(t1.id + 100),
                ..Default::default()
            }).await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            db.update_course(&admin, crs.id, &CoursePatch {
                capacity: Some(-3),
                ..Default::default()
            }).await,
            Err(StoreError::InvalidInput(_))
        ));

        db.delete_course(&admin, crs.id).await.unwrap();
        assert_eq!(
            db.delete_course(&admin, crs.id).await,
            Err(StoreError::NotFound("course"))
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn occupancy_listing() {
        ensure_logging();
        let db = fresh_store().await;

        let teach = db.insert_teacher("A. Hepworth", "ahepworth@teacher.edu")
            .await.unwrap();
        let admin = Caller::admin(1);

        let c0 = db.create_course(&admin, "Algorithms", None, 2, teach.id)
            .await.unwrap();
        let _c1 = db.create_course(&admin, "Databases", None, 5, teach.id)
            .await.unwrap();

        let s0 = db.insert_student("J. Santos", "jsantos@student.edu")
            .await.unwrap();
        let s1 = db.insert_student("K. Niimura", "kniimura@student.edu")
            .await.unwrap();
        db.enroll(s0.id, c0.id).await.unwrap();
        db.enroll(s1.id, c0.id).await.unwrap();

        let occ = db.course_occupancy().await.unwrap();
        assert_eq!(occ.len(), 2);
        // Listing is ordered by course name.
        assert_eq!(&occ[0].course.name, "Algorithms");
        assert_eq!(occ[0].enrolled, 2);
        assert_eq!(&occ[0].teacher_name, "A. Hepworth");
        assert!(!occ[0].overbooked());
        assert_eq!(occ[1].enrolled, 0);

        // Lowering capacity below the headcount is allowed; the course
        // then reports as overbooked.
        db.update_course(&admin, c0.id, &CoursePatch {
            capacity: Some(1),
            ..Default::default()
        }).await.unwrap();
        let occ = db.course_occupancy_by_teacher(teach.id).await.unwrap();
        assert_eq!(occ[0].enrolled, 2);
        assert_eq!(occ[0].course.capacity, 1);
        assert!(occ[0].overbooked());

        db.nuke_database().await.unwrap();
    }
}
