/*!
Subcrate for interoperation with Teacher users.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    http::header::{HeaderMap, HeaderName, HeaderValue},
    Json,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::{
    auth::AuthResult,
    config::Glob,
    user::{Caller, Role, Teacher},
};
use super::*;

pub async fn login(
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    axum::Form(form): axum::Form<LoginData>,
) -> Response {
    log::trace!("teacher::login( {:?}, ... ) called.", &form.uname);

    let teach = {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .get_teacher_by_email(&form.uname).await;
        match res {
            Err(e) => {
                log::error!(
                    "Store::get_teacher_by_email( {:?} ): {}",
                    &form.uname, &e
                );
                return html_500();
            },
            Ok(None) => { return respond_bad_password(); },
            Ok(Some(t)) => t,
        }
    };

    let auth_response = {
        glob.read().await.auth().read().await.check_password_and_issue_key(
            Role::Teacher,
            &teach.email,
            &form.password
        ).await
    };

    let auth_key = match auth_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_password_and_issue_key( Teacher, {:?}, ... ): {}",
                &teach.email, &e
            );
            return html_500();
        },
        Ok(AuthResult::Key(k)) => k,
        Ok(AuthResult::BadPassword) => { return respond_bad_password(); },
        Ok(x) => {
            log::warn!(
                "auth::Db::check_password_and_issue_key( Teacher, {:?}, ... ) returned {:?}, which shouldn't ever happen.",
                &teach.email, &x
            );
            return respond_bad_password();
        },
    };

    let data = json!({
        "uname": &teach.email,
        "key": &auth_key,
        "name": &teach.name,
        "id": &teach.id,
    });

    serve_template(
        StatusCode::OK,
        "teacher",
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

    let teach: Teacher = {
        let glob = glob.read().await;
        let res = glob.data().read().await.get_teacher_by_email(uname).await;
        match res {
            Err(e) => {
                log::error!(
                    "Store::get_teacher_by_email( {:?} ): {}", uname, &e
                );
                return text_500(None);
            },
            Ok(None) => { return respond_bad_key(); },
            Ok(Some(t)) => t,
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
        "populate-courses" => populate_courses(&teach, glob.clone()).await,
        "populate-roster" => populate_roster(&teach, body, glob.clone()).await,
        "assign-grade" => assign_grade(&teach, body, glob.clone()).await,
        "clear-grade" => clear_grade(&teach, body, glob.clone()).await,
        "logout" => super::student::logout(&headers, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognized x-uni-action value.", &x)
        ),
    }
}

/// The courses this teacher owns, with current headcounts.
async fn populate_courses(teach: &Teacher, glob: Arc<RwLock<Glob>>) -> Response {
    let occupancies = {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .course_occupancy_by_teacher(teach.id).await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(o) => o,
        }
    };

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("populate-courses")
        )],
        Json(&occupancies)
    ).into_response()
}

#[derive(Debug, Deserialize)]
struct RosterRequest {
    course: i64,
}

async fn roster_response(
    teach: &Teacher,
    course: i64,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let roster = {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .roster(&Caller::teacher(teach.id), course).await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(r) => r,
        }
    };

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("populate-roster")
        )],
        Json(&roster)
    ).into_response()
}

async fn populate_roster(
    teach: &Teacher,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let req: RosterRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as RosterRequest: {}",
                &body, &e
            );
            return respond_bad_request(
                "Unable to deserialize request body.".to_owned()
            );
        },
    };

    roster_response(teach, req.course, glob).await
}

#[derive(Debug, Deserialize)]
struct GradeData {
    course: i64,
    student: i64,
    grade: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClearData {
    course: i64,
    student: i64,
}

async fn assign_grade(
    teach: &Teacher,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let gd: GradeData = match serde_json::from_str(&body) {
        Ok(g) => g,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as GradeData: {}", &body, &e
            );
            return respond_bad_request(
                "Unable to deserialize request body.".to_owned()
            );
        },
    };

    let grade = match &gd.grade {
        Some(g) => g,
        None => { return respond_bad_request(
            "Grade not provided.".to_owned()
        ); },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.assign_grade(
            &Caller::teacher(teach.id), gd.course, gd.student, grade
        ).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
    }

    roster_response(teach, gd.course, glob).await
}

async fn clear_grade(
    teach: &Teacher,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let cd: ClearData = match serde_json::from_str(&body) {
        Ok(c) => c,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as ClearData: {}", &body, &e
            );
            return respond_bad_request(
                "Unable to deserialize request body.".to_owned()
            );
        },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.clear_grade(
            &Caller::teacher(teach.id), cd.course, cd.student
        ).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
    }

    roster_response(teach, cd.course, glob).await
}
