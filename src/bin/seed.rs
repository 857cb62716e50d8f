/*!
Populating a fresh deployment with enough demo data to allow some
experimentation.

Seed data comes from a TOML file (`seed.toml` by default):

```toml
[[admins]]
uname = "root"
password = "admin123"

[[teachers]]
name = "A. Hepworth"
email = "ahepworth@teacher.com"
password = "password"

[[students]]
name = "J. Santos"
email = "jsantos@student.com"
password = "password"

[[courses]]
name = "Data Structures"
description = "Lists, trees, graphs."
capacity = 30
teacher = "ahepworth@teacher.com"
students = ["jsantos@student.com"]
```

Run with the server's config file and optionally a seed file:

```bash
cargo run --bin seed -- uni.toml seed.toml
```
*/
use serde::Deserialize;
use simplelog::{ColorChoice, TerminalMode, TermLogger};

use uni::{
    config,
    user::{Caller, Role},
};

#[derive(Debug, Deserialize)]
struct SeedAdmin {
    uname: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct SeedPerson {
    name: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct SeedCourse {
    name: String,
    description: Option<String>,
    capacity: i32,
    /// Email of the owning teacher, who must appear in `teachers`.
    teacher: String,
    /// Emails of students to seat immediately.
    #[serde(default)]
    students: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    admins: Vec<SeedAdmin>,
    #[serde(default)]
    teachers: Vec<SeedPerson>,
    #[serde(default)]
    students: Vec<SeedPerson>,
    #[serde(default)]
    courses: Vec<SeedCourse>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("uni")
        .build();
    TermLogger::init(
        uni::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).unwrap();

    let cfg_path = std::env::args().nth(1)
        .unwrap_or_else(|| "uni.toml".to_owned());
    let seed_path = std::env::args().nth(2)
        .unwrap_or_else(|| "seed.toml".to_owned());

    let glob = config::load_configuration(&cfg_path).await.unwrap();

    let seed_text = std::fs::read_to_string(&seed_path).unwrap();
    let seed: SeedFile = toml::from_str(&seed_text).unwrap();

    let data = glob.data().read().await;
    let auth = glob.auth().read().await;

    for a in seed.admins.iter() {
        match data.get_admin_by_uname(&a.uname).await.unwrap() {
            Some(_) => {
                log::info!("Admin {:?} already present; skipping.", &a.uname);
            },
            None => {
                data.insert_admin(&a.uname).await.unwrap();
                auth.add_user(Role::Admin, &a.uname, &a.password)
                    .await.unwrap();
                log::info!("Inserted admin {:?}.", &a.uname);
            },
        }
    }

    for t in seed.teachers.iter() {
        match data.get_teacher_by_email(&t.email).await.unwrap() {
            Some(_) => {
                log::info!("Teacher {:?} already present; skipping.", &t.email);
            },
            None => {
                data.insert_teacher(&t.name, &t.email).await.unwrap();
                auth.add_user(Role::Teacher, &t.email, &t.password)
                    .await.unwrap();
                log::info!("Inserted teacher {:?}.", &t.email);
            },
        }
    }

    for s in seed.students.iter() {
        match data.get_student_by_email(&s.email).await.unwrap() {
            Some(_) => {
                log::info!("Student {:?} already present; skipping.", &s.email);
            },
            None => {
                data.insert_student(&s.name, &s.email).await.unwrap();
                auth.add_user(Role::Student, &s.email, &s.password)
                    .await.unwrap();
                log::info!("Inserted student {:?}.", &s.email);
            },
        }
    }

    // Course creation is an admin action in the store's eyes; for
    // seeding, the role is all that matters.
    let seeder = Caller::admin(0);

    for c in seed.courses.iter() {
        let teach = match data.get_teacher_by_email(&c.teacher).await.unwrap() {
            Some(t) => t,
            None => {
                log::error!(
                    "Course {:?} names unknown teacher {:?}; skipping.",
                    &c.name, &c.teacher
                );
                continue;
            },
        };

        let crs = data.create_course(
            &seeder,
            &c.name,
            c.description.as_deref(),
            c.capacity,
            teach.id,
        ).await.unwrap();
        log::info!("Inserted course {:?} (id {}).", &crs.name, &crs.id);

        for email in c.students.iter() {
            let stud = match data.get_student_by_email(email).await.unwrap() {
                Some(s) => s,
                None => {
                    log::error!(
                        "Course {:?} seats unknown student {:?}; skipping.",
                        &c.name, email
                    );
                    continue;
                },
            };
            match data.enroll(stud.id, crs.id).await {
                Ok(_) => {
                    log::info!(
                        "Enrolled {:?} in {:?}.", email, &crs.name
                    );
                },
                Err(e) => {
                    log::error!(
                        "Couldn't enroll {:?} in {:?}: {}",
                        email, &crs.name, &e
                    );
                },
            }
        }
    }

    log::info!("Seeding complete.");
}
