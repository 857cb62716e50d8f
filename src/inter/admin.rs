/*!
Subcrate for interoperation with Admin users.

Instead of reflection-driven scaffolding, every entity the admin can
touch gets its own little data-transfer struct and its own explicitly
written action below.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    http::header::{HeaderMap, HeaderName, HeaderValue},
    Json,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::{
    auth::AuthResult,
    config::Glob,
    course::CoursePatch,
    store::StoreError,
    user::{Admin, Caller, NewStudent, Role},
};
use super::*;

pub async fn login(
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    axum::Form(form): axum::Form<LoginData>,
) -> Response {
    log::trace!("admin::login( {:?}, ... ) called.", &form.uname);

    let admin = {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .get_admin_by_uname(&form.uname).await;
        match res {
            Err(e) => {
                log::error!(
                    "Store::get_admin_by_uname( {:?} ): {}", &form.uname, &e
                );
                return html_500();
            },
            Ok(None) => { return respond_bad_password(); },
            Ok(Some(a)) => a,
        }
    };

    let auth_response = {
        glob.read().await.auth().read().await.check_password_and_issue_key(
            Role::Admin,
            &admin.uname,
            &form.password
        ).await
    };

    let auth_key = match auth_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_password_and_issue_key( Admin, {:?}, ... ): {}",
                &admin.uname, &e
            );
            return html_500();
        },
        Ok(AuthResult::Key(k)) => k,
        Ok(AuthResult::BadPassword) => { return respond_bad_password(); },
        Ok(x) => {
            log::warn!(
                "auth::Db::check_password_and_issue_key( Admin, {:?}, ... ) returned {:?}, which shouldn't ever happen.",
                &admin.uname, &x
            );
            return respond_bad_password();
        },
    };

    let data = json!({
        "uname": &admin.uname,
        "key": &auth_key,
    });

    serve_template(
        StatusCode::OK,
        "admin",
        &data,
        vec![]
    )
}

pub async fn api(
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    headers: HeaderMap,
    body: Option<String>,
) -> Response {
    let uname: &str = match headers.get("x-uni-uname") {
        Some(uname) => match uname.to_str() {
            Ok(s) => s,
            Err(_) => { return text_500(None); },
        },
        None => { return text_500(None); },
    };

    let admin: Admin = {
        let glob = glob.read().await;
        let res = glob.data().read().await.get_admin_by_uname(uname).await;
        match res {
            Err(e) => {
                log::error!(
                    "Store::get_admin_by_uname( {:?} ): {}", uname, &e
                );
                return text_500(None);
            },
            Ok(None) => { return respond_bad_key(); },
            Ok(Some(a)) => a,
        }
    };

    let action = match headers.get("x-uni-action") {
        Some(act) => match act.to_str() {
            Ok(s) => s,
            Err(_) => { return respond_bad_request(
                "x-uni-action header unrecognizable.".to_owned()
            ); },
        },
        None => { return respond_bad_request(
            "Request must have an x-uni-action header.".to_owned()
        ); },
    };

    match action {
        "populate-courses" => super::student::populate_catalog(glob.clone()).await,
        "add-course" => add_course(&admin, body, glob.clone()).await,
        "update-course" => update_course(&admin, body, glob.clone()).await,
        "delete-course" => delete_course(&admin, body, glob.clone()).await,
        "populate-students" => populate_students(glob.clone()).await,
        "populate-teachers" => populate_teachers(glob.clone()).await,
        "add-student" => add_student(body, glob.clone()).await,
        "add-teacher" => add_teacher(body, glob.clone()).await,
        "add-admin" => add_admin(body, glob.clone()).await,
        "upload-students" => upload_students(body, glob.clone()).await,
        "delete-student" => delete_student(body, glob.clone()).await,
        "delete-teacher" => delete_teacher(body, glob.clone()).await,
        "delete-admin" => delete_admin(&admin, body, glob.clone()).await,
        "reset-password" => reset_password(body, glob.clone()).await,
        "update-enrollment" => update_enrollment(&admin, body, glob.clone()).await,
        "delete-enrollment" => delete_enrollment(body, glob.clone()).await,
        "logout" => super::student::logout(&headers, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognized x-uni-action value.", &x)
        ),
    }
}

/// Deserialize an action's JSON body, or produce the response
/// explaining why we couldn't.
fn parse_body<T: DeserializeOwned>(body: Option<String>) -> Result<T, Response> {
    let body = match body {
        Some(body) => body,
        None => {
            return Err(respond_bad_request(
                "Request requires a JSON body.".to_owned()
            ));
        },
    };

    match serde_json::from_str(&body) {
        Ok(val) => Ok(val),
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?}: {}", &body, &e
            );
            Err(respond_bad_request(
                "Unable to deserialize request body.".to_owned()
            ))
        },
    }
}

#[derive(Debug, Deserialize)]
struct CourseData {
    name: String,
    description: Option<String>,
    capacity: i32,
    teacher: i64,
}

async fn add_course(
    admin: &Admin,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let cd: CourseData = match parse_body(body) {
        Ok(cd) => cd,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.create_course(
            &Caller::admin(admin.id),
            &cd.name,
            cd.description.as_deref(),
            cd.capacity,
            cd.teacher,
        ).await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(crs) => {
                log::info!("Admin added new course: {:?}", &crs.name);
            },
        }
    }

    super::student::populate_catalog(glob).await
}

#[derive(Debug, Deserialize)]
struct CourseUpdateData {
    course: i64,
    name: Option<String>,
    description: Option<String>,
    capacity: Option<i32>,
    teacher: Option<i64>,
}

async fn update_course(
    admin: &Admin,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let cud: CourseUpdateData = match parse_body(body) {
        Ok(cud) => cud,
        Err(resp) => { return resp; },
    };

    let patch = CoursePatch {
        name: cud.name,
        description: cud.description,
        capacity: cud.capacity,
        teacher: cud.teacher,
    };
    if patch.is_empty() {
        return respond_bad_request(
            "Update contains no changes.".to_owned()
        );
    }

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.update_course(
            &Caller::admin(admin.id), cud.course, &patch
        ).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
    }
    log::info!("Admin updated course {}.", &cud.course);

    super::student::populate_catalog(glob).await
}

#[derive(Debug, Deserialize)]
struct CourseRef {
    course: i64,
}

async fn delete_course(
    admin: &Admin,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let cr: CourseRef = match parse_body(body) {
        Ok(cr) => cr,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.delete_course(
            &Caller::admin(admin.id), cr.course
        ).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
    }
    log::info!("Admin deleted course {}.", &cr.course);

    super::student::populate_catalog(glob).await
}

async fn populate_students(glob: Arc<RwLock<Glob>>) -> Response {
    let students = {
        let glob = glob.read().await;
        let res = glob.data().read().await.get_students().await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(s) => s,
        }
    };

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("populate-students")
        )],
        Json(&students)
    ).into_response()
}

async fn populate_teachers(glob: Arc<RwLock<Glob>>) -> Response {
    let teachers = {
        let glob = glob.read().await;
        let res = glob.data().read().await.get_teachers().await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(t) => t,
        }
    };

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("populate-teachers")
        )],
        Json(&teachers)
    ).into_response()
}

#[derive(Debug, Deserialize)]
struct PersonData {
    name: String,
    email: String,
    password: String,
}

async fn add_student(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let pd: PersonData = match parse_body(body) {
        Ok(pd) => pd,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .insert_student(&pd.name, &pd.email).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
        let res = glob.auth().read().await
            .add_user(Role::Student, &pd.email, &pd.password).await;
        if let Err(e) = res {
            log::error!(
                "Error inserting student {:?} into auth DB: {}",
                &pd.email, &e
            );
            return text_500(Some(
                "Student record created, but storing credentials failed.".to_owned()
            ));
        }
    }
    log::info!("Admin added student {:?}.", &pd.email);

    populate_students(glob).await
}

async fn add_teacher(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let pd: PersonData = match parse_body(body) {
        Ok(pd) => pd,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .insert_teacher(&pd.name, &pd.email).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
        let res = glob.auth().read().await
            .add_user(Role::Teacher, &pd.email, &pd.password).await;
        if let Err(e) = res {
            log::error!(
                "Error inserting teacher {:?} into auth DB: {}",
                &pd.email, &e
            );
            return text_500(Some(
                "Teacher record created, but storing credentials failed.".to_owned()
            ));
        }
    }
    log::info!("Admin added teacher {:?}.", &pd.email);

    populate_teachers(glob).await
}

#[derive(Debug, Deserialize)]
struct AdminData {
    uname: String,
    password: String,
}

async fn add_admin(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let ad: AdminData = match parse_body(body) {
        Ok(ad) => ad,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.insert_admin(&ad.uname).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
        let res = glob.auth().read().await
            .add_user(Role::Admin, &ad.uname, &ad.password).await;
        if let Err(e) = res {
            log::error!(
                "Error inserting admin {:?} into auth DB: {}", &ad.uname, &e
            );
            return text_500(Some(
                "Admin record created, but storing credentials failed.".to_owned()
            ));
        }
    }
    log::info!("Admin added admin {:?}.", &ad.uname);

    StatusCode::OK.into_response()
}

async fn upload_students(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a CSV body.".to_owned()
        ); },
    };

    let new_students = match NewStudent::vec_from_csv_reader(
        body.as_bytes()
    ) {
        Ok(v) => v,
        Err(e) => {
            log::error!(
                "Error reading uploaded student CSV: {}\n\nCSV text:\n\n{}\n",
                &e, &body
            );
            return respond_bad_request(e);
        },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .insert_students(&new_students).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
        let auth = glob.auth().read().await;
        for ns in new_students.iter() {
            if let Err(e) = auth.add_user(
                Role::Student, &ns.email, &ns.password
            ).await {
                log::error!(
                    "Error inserting student {:?} into auth DB: {}",
                    &ns.email, &e
                );
                return text_500(Some(
                    "Student records created, but storing credentials failed.".to_owned()
                ));
            }
        }
    }
    log::info!("Admin uploaded {} students.", new_students.len());

    populate_students(glob).await
}

#[derive(Debug, Deserialize)]
struct PersonRef {
    id: i64,
}

async fn delete_student(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let pr: PersonRef = match parse_body(body) {
        Ok(pr) => pr,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.delete_student(pr.id).await;
        let stud = match res {
            Err(e) => { return respond_store_error(e); },
            Ok(s) => s,
        };
        let res = glob.auth().read().await
            .delete_user(Role::Student, &stud.email).await;
        if let Err(e) = res {
            // The person is gone from the data DB; a stale credential
            // row can't log anyone in, so log it and carry on.
            log::error!(
                "Error removing student {:?} from auth DB: {}",
                &stud.email, &e
            );
        }
    }
    log::info!("Admin deleted student {}.", &pr.id);

    populate_students(glob).await
}

async fn delete_teacher(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let pr: PersonRef = match parse_body(body) {
        Ok(pr) => pr,
        Err(resp) => { return resp; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.delete_teacher(pr.id).await;
        let teach = match res {
            Err(e) => { return respond_store_error(e); },
            Ok(t) => t,
        };
        let res = glob.auth().read().await
            .delete_user(Role::Teacher, &teach.email).await;
        if let Err(e) = res {
            log::error!(
                "Error removing teacher {:?} from auth DB: {}",
                &teach.email, &e
            );
        }
    }
    log::info!("Admin deleted teacher {}.", &pr.id);

    populate_teachers(glob).await
}

#[derive(Debug, Deserialize)]
struct AdminRef {
    uname: String,
}

async fn delete_admin(
    admin: &Admin,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let ar: AdminRef = match parse_body(body) {
        Ok(ar) => ar,
        Err(resp) => { return resp; },
    };

    if ar.uname == admin.uname {
        return respond_bad_request(
            "You can't delete yourself while logged in.".to_owned()
        );
    }

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.delete_admin(&ar.uname).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
        let res = glob.auth().read().await
            .delete_user(Role::Admin, &ar.uname).await;
        if let Err(e) = res {
            log::error!(
                "Error removing admin {:?} from auth DB: {}", &ar.uname, &e
            );
        }
    }
    log::info!("Admin deleted admin {:?}.", &ar.uname);

    StatusCode::OK.into_response()
}

#[derive(Debug, Deserialize)]
struct PasswordReset {
    role: Role,
    uname: String,
    password: String,
}

async fn reset_password(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let pr: PasswordReset = match parse_body(body) {
        Ok(pr) => pr,
        Err(resp) => { return resp; },
    };

    let res = glob.read().await.auth().read().await.set_password(
        pr.role, &pr.uname, &pr.password
    ).await;
    if let Err(e) = res {
        log::error!(
            "auth::Db::set_password( {}, {:?}, ... ): {}",
            &pr.role, &pr.uname, &e
        );
        return text_500(None);
    }
    log::info!("Admin reset password for {} {:?}.", &pr.role, &pr.uname);

    StatusCode::OK.into_response()
}

#[derive(Debug, Deserialize)]
struct EnrollmentUpdate {
    enrollment: i64,
    grade: Option<String>,
}

/// Set or clear a grade by enrollment id. The admin UI addresses seats
/// this way; the same ownership-or-admin rule applies underneath.
async fn update_enrollment(
    admin: &Admin,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let eu: EnrollmentUpdate = match parse_body(body) {
        Ok(eu) => eu,
        Err(resp) => { return resp; },
    };

    let glob = glob.read().await;
    let data = glob.data().read().await;

    let enr = match data.get_enrollment_by_id(eu.enrollment).await {
        Err(e) => { return respond_store_error(e); },
        Ok(None) => {
            return respond_store_error(StoreError::NotFound("enrollment"));
        },
        Ok(Some(enr)) => enr,
    };

    let caller = Caller::admin(admin.id);
    let updated = match &eu.grade {
        Some(g) => {
            match data.assign_grade(&caller, enr.course, enr.student, g).await {
                Err(e) => { return respond_store_error(e); },
                Ok(enr) => enr,
            }
        },
        None => {
            if let Err(e) = data.clear_grade(&caller, enr.course, enr.student).await {
                return respond_store_error(e);
            }
            match data.get_enrollment_by_id(eu.enrollment).await {
                Err(e) => { return respond_store_error(e); },
                Ok(None) => {
                    return respond_store_error(StoreError::NotFound("enrollment"));
                },
                Ok(Some(enr)) => enr,
            }
        },
    };

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("update-enrollment")
        )],
        Json(&updated)
    ).into_response()
}

#[derive(Debug, Deserialize)]
struct EnrollmentRef {
    enrollment: i64,
}

/// Remove a seat by enrollment id.
async fn delete_enrollment(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let er: EnrollmentRef = match parse_body(body) {
        Ok(er) => er,
        Err(resp) => { return resp; },
    };

    let glob = glob.read().await;
    let data = glob.data().read().await;

    let enr = match data.get_enrollment_by_id(er.enrollment).await {
        Err(e) => { return respond_store_error(e); },
        Ok(None) => {
            return respond_store_error(StoreError::NotFound("enrollment"));
        },
        Ok(Some(enr)) => enr,
    };

    if let Err(e) = data.withdraw(enr.student, enr.course).await {
        return respond_store_error(e);
    }
    log::info!("Admin removed enrollment {}.", &er.enrollment);

    StatusCode::OK.into_response()
}
