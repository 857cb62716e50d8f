/*
`Store` methods et. al. for provisioning and looking up the three kinds
of people.

Students and teachers are found by email, admins by username. The auth
database holds the corresponding password digests under the same
natural keys; keeping the two in step is the handler layer's job.
*/
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_postgres::{Row, Transaction, types::{ToSql, Type}};

use super::{Store, StoreError};
use crate::user::{Admin, NewStudent, Student, Teacher};

fn student_from_row(row: &Row) -> Result<Student, StoreError> {
    Ok(Student {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
    })
}

fn teacher_from_row(row: &Row) -> Result<Teacher, StoreError> {
    Ok(Teacher {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
    })
}

/// Report whether `table` already holds a row with the given `email`.
/// Used before inserts to ensure good error messaging when an email
/// address is already in use.
async fn check_email_in_use(
    t: &Transaction<'_>,
    table: &str,
    email: &str,
) -> Result<bool, StoreError> {
    log::trace!("check_email_in_use( T, {:?}, {:?} ) called.", table, email);

    // `table` is one of two literals supplied by this module, never
    // request data.
    let stmt = format!("SELECT id FROM {} WHERE email = $1", table);
    let row = t.query_opt(stmt.as_str(), &[&email]).await
        .map_err(|e| StoreError::from(e)
            .annotate("Error querying for preexisting email"))?;

    Ok(row.is_some())
}

impl Store {
    pub async fn insert_student(
        &self,
        name: &str,
        email: &str,
    ) -> Result<Student, StoreError> {
        log::trace!(
            "Store::insert_student( {:?}, {:?} ) called.",
            name, email
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if check_email_in_use(&t, "students", email).await? {
            return Err(StoreError::invalid(format!(
                "A student with email {:?} already exists.", email
            )));
        }

        let row = t.query_one(
            "INSERT INTO students (name, email)
                VALUES ($1, $2)
                RETURNING id",
            &[&name, &email]
        ).await?;
        let id: i64 = row.try_get("id")?;

        t.commit().await?;
        log::trace!("Inserted Student {:?} ({}).", name, email);

        Ok(Student { id, name: name.to_owned(), email: email.to_owned() })
    }

    /**
    Bulk-insert a batch of uploaded students.

    The whole batch goes in a single transaction; one bad record (an
    email already in use, say) and none of them stick.
    */
    pub async fn insert_students(
        &self,
        students: &[NewStudent]
    ) -> Result<usize, StoreError> {
        log::trace!(
            "Store::insert_students( [ {} students ] ) called.",
            students.len()
        );

        let new_emails: Vec<&str> = students.iter()
            .map(|s| s.email.as_str())
            .collect();

        let mut client = self.connect().await?;
        let t = client.transaction().await?;
        let preexisting_email_query = t.prepare_typed(
            "SELECT email FROM students WHERE email = ANY($1)",
            &[Type::TEXT_ARRAY]
        ).await?;

        // Check to see if any of the new students have emails already in
        // use and return an informative error if so.
        let preexisting_email_rows = t.query(
            &preexisting_email_query,
            &[&new_emails]
        ).await?;
        if !preexisting_email_rows.is_empty() {
            let mut estr = String::from(
                "Database already contains students with the following emails:"
            );
            for row in preexisting_email_rows.iter() {
                let email: &str = row.try_get("email")?;
                estr.push('\n');
                estr.push_str(email);
            }
            return Err(StoreError::invalid(estr));
        }

        let insert_query = t.prepare_typed(
            "INSERT INTO students (name, email) VALUES ($1, $2)",
            &[Type::TEXT, Type::TEXT]
        ).await?;

        let mut n_inserted: u64 = 0;
        {
            let pvec: Vec<[&(dyn ToSql + Sync); 2]> = students.iter()
                .map(|s| {
                    let p: [&(dyn ToSql + Sync); 2] = [&s.name, &s.email];
                    p
                }).collect();

            let mut inserts = FuturesUnordered::new();
            for params in pvec.iter() {
                inserts.push(
                    t.execute(&insert_query, params)
                );
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_inserted += 1; },
                    Err(e) => {
                        let estr = format!(
                            "Error inserting student into database: {}", &e
                        );
                        return Err(StoreError::Db(estr));
                    },
                }
            }
        }

        t.commit().await?;

        log::trace!("Inserted {} student rows.", &n_inserted);
        Ok(n_inserted as usize)
    }

    pub async fn insert_teacher(
        &self,
        name: &str,
        email: &str,
    ) -> Result<Teacher, StoreError> {
        log::trace!(
            "Store::insert_teacher( {:?}, {:?} ) called.",
            name, email
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if check_email_in_use(&t, "teachers", email).await? {
            return Err(StoreError::invalid(format!(
                "A teacher with email {:?} already exists.", email
            )));
        }

        let row = t.query_one(
            "INSERT INTO teachers (name, email)
                VALUES ($1, $2)
                RETURNING id",
            &[&name, &email]
        ).await?;
        let id: i64 = row.try_get("id")?;

        t.commit().await?;
        log::trace!("Inserted Teacher {:?} ({}).", name, email);

        Ok(Teacher { id, name: name.to_owned(), email: email.to_owned() })
    }

    pub async fn insert_admin(
        &self,
        uname: &str,
    ) -> Result<Admin, StoreError> {
        log::trace!("Store::insert_admin( {:?} ) called.", uname);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let preexisting = t.query_opt(
            "SELECT id FROM admins WHERE uname = $1",
            &[&uname]
        ).await?;
        if preexisting.is_some() {
            return Err(StoreError::invalid(format!(
                "An admin with username {:?} already exists.", uname
            )));
        }

        let row = t.query_one(
            "INSERT INTO admins (uname) VALUES ($1) RETURNING id",
            &[&uname]
        ).await?;
        let id: i64 = row.try_get("id")?;

        t.commit().await?;
        log::trace!("Inserted Admin {:?}.", uname);

        Ok(Admin { id, uname: uname.to_owned() })
    }

    pub async fn get_student(
        &self,
        id: i64
    ) -> Result<Option<Student>, StoreError> {
        log::trace!("Store::get_student( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, email FROM students WHERE id = $1",
            &[&id]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(student_from_row(&row)?)),
        }
    }

    pub async fn get_student_by_email(
        &self,
        email: &str
    ) -> Result<Option<Student>, StoreError> {
        log::trace!("Store::get_student_by_email( {:?} ) called.", email);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, email FROM students WHERE email = $1",
            &[&email]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(student_from_row(&row)?)),
        }
    }

    pub async fn get_students(&self) -> Result<Vec<Student>, StoreError> {
        log::trace!("Store::get_students() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT id, name, email FROM students ORDER BY name",
            &[]
        ).await?;

        let mut students: Vec<Student> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            students.push(student_from_row(row)?);
        }

        Ok(students)
    }

    pub async fn get_teacher(
        &self,
        id: i64
    ) -> Result<Option<Teacher>, StoreError> {
        log::trace!("Store::get_teacher( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, email FROM teachers WHERE id = $1",
            &[&id]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(teacher_from_row(&row)?)),
        }
    }

    pub async fn get_teacher_by_email(
        &self,
        email: &str
    ) -> Result<Option<Teacher>, StoreError> {
        log::trace!("Store::get_teacher_by_email( {:?} ) called.", email);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, email FROM teachers WHERE email = $1",
            &[&email]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(teacher_from_row(&row)?)),
        }
    }

    pub async fn get_teachers(&self) -> Result<Vec<Teacher>, StoreError> {
        log::trace!("Store::get_teachers() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT id, name, email FROM teachers ORDER BY name",
            &[]
        ).await?;

        let mut teachers: Vec<Teacher> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            teachers.push(teacher_from_row(row)?);
        }

        Ok(teachers)
    }

    pub async fn get_admin_by_uname(
        &self,
        uname: &str
    ) -> Result<Option<Admin>, StoreError> {
        log::trace!("Store::get_admin_by_uname( {:?} ) called.", uname);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, uname FROM admins WHERE uname = $1",
            &[&uname]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(Admin {
                id: row.try_get("id")?,
                uname: row.try_get("uname")?,
            })),
        }
    }

    /**
    Deletes a student and, in the same transaction, every enrollment the
    student holds.

    Returns the deleted record so the caller can also retire the
    student's auth entry.
    */
    pub async fn delete_student(
        &self,
        id: i64
    ) -> Result<Student, StoreError> {
        log::trace!("Store::delete_student( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let n = t.execute(
            "DELETE FROM enrollments WHERE student = $1",
            &[&id]
        ).await?;
        if n > 0 {
            log::trace!("Deleted {} enrollments of student {}.", &n, &id);
        }

        let row = match t.query_opt(
            "DELETE FROM students WHERE id = $1 RETURNING id, name, email",
            &[&id]
        ).await? {
            None => { return Err(StoreError::NotFound("student")); },
            Some(row) => row,
        };
        let stud = student_from_row(&row)?;

        t.commit().await?;
        Ok(stud)
    }

    /**
    Deletes a teacher.

    A teacher still named as the owner of any course can't go; courses
    must be deleted or reassigned first.
    */
    pub async fn delete_teacher(
        &self,
        id: i64
    ) -> Result<Teacher, StoreError> {
        log::trace!("Store::delete_teacher( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let course_row = t.query_opt(
            "SELECT id FROM courses WHERE teacher = $1 LIMIT 1",
            &[&id]
        ).await?;
        if course_row.is_some() {
            return Err(StoreError::invalid(
                "Teacher still owns at least one course."
            ));
        }

        let row = match t.query_opt(
            "DELETE FROM teachers WHERE id = $1 RETURNING id, name, email",
            &[&id]
        ).await? {
            None => { return Err(StoreError::NotFound("teacher")); },
            Some(row) => row,
        };
        let teach = teacher_from_row(&row)?;

        t.commit().await?;
        Ok(teach)
    }

    pub async fn delete_admin(
        &self,
        uname: &str
    ) -> Result<(), StoreError> {
        log::trace!("Store::delete_admin( {:?} ) called.", uname);

        let client = self.connect().await?;

        let n = client.execute(
            "DELETE FROM admins WHERE uname = $1",
            &[&uname]
        ).await?;

        match n {
            0 => Err(StoreError::NotFound("admin")),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::TEST_CONNECTION;

    static ADMINS: &[&str] = &["root", "dan"];

    static TEACHERS: &[(&str, &str)] = &[
        ("A. Hepworth", "ahepworth@teacher.edu"),
        ("B. Irfan", "birfan@teacher.edu"),
    ];

    static STUDENTS: &[(&str, &str)] = &[
        ("J. Santos", "jsantos@student.edu"),
        ("K. Niimura", "kniimura@student.edu"),
    ];

    #[tokio::test]
    #[serial]
    async fn insert_get_delete_people() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        for uname in ADMINS.iter() {
            db.insert_admin(uname).await.unwrap();
        }
        for (name, email) in TEACHERS.iter() {
            db.insert_teacher(name, email).await.unwrap();
        }
        for (name, email) in STUDENTS.iter() {
            db.insert_student(name, email).await.unwrap();
        }

        // Natural keys are unique per table.
        assert!(matches!(
            db.insert_admin("root").await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            db.insert_teacher("Somebody Else", "ahepworth@teacher.edu").await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            db.insert_student("Somebody Else", "jsantos@student.edu").await,
            Err(StoreError::InvalidInput(_))
        ));

        let t = db.get_teacher_by_email("birfan@teacher.edu")
            .await.unwrap().unwrap();
        assert_eq!(&t.name, "B. Irfan");
        assert_eq!(db.get_teacher(t.id).await.unwrap().unwrap().email, t.email);

        let s = db.get_student_by_email("jsantos@student.edu")
            .await.unwrap().unwrap();
        assert_eq!(&s.name, "J. Santos");

        assert_eq!(db.get_students().await.unwrap().len(), STUDENTS.len());
        assert_eq!(db.get_teachers().await.unwrap().len(), TEACHERS.len());

        let deleted = db.delete_student(s.id).await.unwrap();
        assert_eq!(deleted.email, s.email);
        assert_eq!(
            db.delete_student(s.id).await,
            Err(StoreError::NotFound("student"))
        );

        db.delete_teacher(t.id).await.unwrap();
        db.delete_admin("dan").await.unwrap();
        assert_eq!(
            db.delete_admin("dan").await,
            Err(StoreError::NotFound("admin"))
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn bulk_insert_students() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let batch: Vec<NewStudent> = STUDENTS.iter()
            .map(|(name, email)| NewStudent {
                name: (*name).to_owned(),
                email: (*email).to_owned(),
                password: "password".to_owned(),
            }).collect();

        let n = db.insert_students(&batch).await.unwrap();
        assert_eq!(n, STUDENTS.len());

        // A second upload of the same batch trips the email check and
        // inserts nothing.
        assert!(matches!(
            db.insert_students(&batch).await,
            Err(StoreError::InvalidInput(_))
        ));
        assert_eq!(db.get_students().await.unwrap().len(), STUDENTS.len());

        db.nuke_database().await.unwrap();
    }
}
