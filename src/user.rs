/*!
People: the three kinds of account the system knows about.

`Student` and `Teacher` rows are identified to humans by email address;
`Admin`s by a short username. The numeric `id`s are the surrogate keys
the rest of the database hangs off of. Password digests live in the
auth database, not here.
*/
use std::io::Read;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin   => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin"   => Ok(Role::Admin),
            "Teacher" => Ok(Role::Teacher),
            "Student" => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

/// Who is asking. Resolved from the session key by the handler layer
/// and passed explicitly into every access-controlled store method.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

impl Caller {
    pub fn admin(id: i64) -> Caller { Caller { id, role: Role::Admin } }
    pub fn teacher(id: i64) -> Caller { Caller { id, role: Role::Teacher } }
    pub fn student(id: i64) -> Caller { Caller { id, role: Role::Student } }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Admin {
    pub id: i64,
    pub uname: String,
}

/// A not-yet-provisioned student, as uploaded by an Admin.
#[derive(Debug, Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl NewStudent {
    /**
    Student .csv rows should look like this

    ```csv
    #name,          email,                    password
    John Smith,     lil.j.smithy@gmail.com,   hunter2
    ```
    */
    pub fn from_csv_line(
        row: &csv::StringRecord
    ) -> Result<NewStudent, &'static str> {
        log::trace!("NewStudent::from_csv_line( {:?} ) called.", row);

        let name = match row.get(0) {
            Some(s) => s.to_owned(),
            None => { return Err("no name"); },
        };
        let email = match row.get(1) {
            Some(s) => s.to_owned(),
            None => { return Err("no email address"); },
        };
        let password = match row.get(2) {
            Some(s) => s.to_owned(),
            None => { return Err("no password"); },
        };

        Ok(NewStudent { name, email, password })
    }

    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<NewStudent>, String> {
        log::trace!("NewStudent::vec_from_csv_reader(...) called.");

        let mut csv_reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(false)
            .has_headers(false)
            .from_reader(r);

        let mut students: Vec<NewStudent> = Vec::new();

        for (n, res) in csv_reader.records().enumerate() {
            match res {
                Ok(record) => match NewStudent::from_csv_line(&record) {
                    Ok(stud) => { students.push(stud); },
                    Err(e) => {
                        let estr = match record.position() {
                            Some(p) => format!(
                                "Error on line {}: {}",
                                p.line(), &e
                            ),
                            None => format!(
                                "Error in CSV record {}: {}", &n, &e
                            ),
                        };
                        return Err(estr);
                    },
                },
                Err(e) => {
                    let estr = match e.position() {
                        Some(p) => format!(
                            "Error on line {}: {}", p.line(), &e
                        ),
                        None => format!(
                            "Error in CSV record {}: {}", &n, &e
                        ),
                    };
                    return Err(estr);
                }
            }
        }

        log::trace!(
            "NewStudent::vec_from_csv_reader() returns {} students.",
            students.len()
        );
        Ok(students)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    static GOOD_CSV: &str = "\
#name,      email,                  password
John Smith, lil.j.smithy@gmail.com, hunter2
Zel Kanto,  zkanto@student.edu,     swordfish
";

    static SHORT_CSV: &str = "John Smith, jsmith@student.edu\n";

    #[test]
    fn roles_round_trip() {
        for role in [Role::Admin, Role::Teacher, Role::Student] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
        assert!("Boss".parse::<Role>().is_err());
    }

    #[test]
    fn students_from_csv() {
        ensure_logging();
        let studs = NewStudent::vec_from_csv_reader(GOOD_CSV.as_bytes()).unwrap();
        assert_eq!(studs.len(), 2);
        assert_eq!(&studs[0].name, "John Smith");
        assert_eq!(&studs[1].email, "zkanto@student.edu");
    }

    #[test]
    fn students_from_bad_csv() {
        ensure_logging();
        assert!(NewStudent::vec_from_csv_reader(SHORT_CSV.as_bytes()).is_err());
    }
}
