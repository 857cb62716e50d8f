/*!
Subcrate for interoperation with Student users.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    http::header::{HeaderMap, HeaderName, HeaderValue},
    Json,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::{
    auth::AuthResult,
    config::Glob,
    course::Occupancy,
    user::{Role, Student},
};
use super::*;

pub async fn login(
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    axum::Form(form): axum::Form<LoginData>,
) -> Response {
    log::trace!("student::login( {:?}, ... ) called.", &form.uname);

    let stud = {
        let glob = glob.read().await;
        let res = glob.data().read().await
            .get_student_by_email(&form.uname).await;
        match res {
            Err(e) => {
                log::error!(
                    "Store::get_student_by_email( {:?} ): {}",
                    &form.uname, &e
                );
                return html_500();
            },
            // An unknown email reads the same as a wrong password.
            Ok(None) => { return respond_bad_password(); },
            Ok(Some(s)) => s,
        }
    };

    let auth_response = {
        glob.read().await.auth().read().await.check_password_and_issue_key(
            Role::Student,
            &stud.email,
            &form.password
        ).await
    };

    let auth_key = match auth_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_password_and_issue_key( Student, {:?}, ... ): {}",
                &stud.email, &e
            );
            return html_500();
        },
        Ok(AuthResult::Key(k)) => k,
        Ok(AuthResult::BadPassword) => { return respond_bad_password(); },
        Ok(x) => {
            log::warn!(
                "auth::Db::check_password_and_issue_key( Student, {:?}, ... ) returned {:?}, which shouldn't ever happen.",
                &stud.email, &x
            );
            return respond_bad_password();
        },
    };

    let data = json!({
        "uname": &stud.email,
        "key": &auth_key,
        "name": &stud.name,
        "id": &stud.id,
    });

    serve_template(
        StatusCode::OK,
        "student",
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

    let stud: Student = {
        let glob = glob.read().await;
        let res = glob.data().read().await.get_student_by_email(uname).await;
        match res {
            Err(e) => {
                log::error!(
                    "Store::get_student_by_email( {:?} ): {}", uname, &e
                );
                return text_500(None);
            },
            // Key checked out, but the person is gone.
            Ok(None) => { return respond_bad_key(); },
            Ok(Some(s)) => s,
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
        "populate-dashboard" => populate_dashboard(&stud, glob.clone()).await,
        "populate-catalog" => populate_catalog(glob.clone()).await,
        "enroll" => enroll(&stud, body, glob.clone()).await,
        "withdraw" => withdraw(&stud, body, glob.clone()).await,
        "logout" => logout(&headers, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognized x-uni-action value.", &x)
        ),
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CatalogRow<'a> {
    id: i64,
    name: &'a str,
    teacher: &'a str,
    enrolled: i64,
    capacity: i32,
    seats_left: i64,
    overbooked: bool,
}

impl<'a> CatalogRow<'a> {
    fn from_occupancy(occ: &'a Occupancy) -> CatalogRow<'a> {
        CatalogRow {
            id: occ.course.id,
            name: &occ.course.name,
            teacher: &occ.teacher_name,
            enrolled: occ.enrolled,
            capacity: occ.course.capacity,
            seats_left: occ.seats_left(),
            overbooked: occ.overbooked(),
        }
    }
}

/// The whole course catalog with live headcounts, the way the
/// registration page wants it.
pub(super) async fn populate_catalog(glob: Arc<RwLock<Glob>>) -> Response {
    let occupancies = {
        let glob = glob.read().await;
        let res = glob.data().read().await.course_occupancy().await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(o) => o,
        }
    };

    let catalog: Vec<CatalogRow> = occupancies.iter()
        .map(CatalogRow::from_occupancy)
        .collect();

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("populate-catalog")
        )],
        Json(&catalog)
    ).into_response()
}

async fn populate_dashboard(stud: &Student, glob: Arc<RwLock<Glob>>) -> Response {
    let transcript = {
        let glob = glob.read().await;
        let res = glob.data().read().await.transcript(stud.id).await;
        match res {
            Err(e) => { return respond_store_error(e); },
            Ok(t) => t,
        }
    };

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-uni-action"),
            HeaderValue::from_static("populate-dashboard")
        )],
        Json(&transcript)
    ).into_response()
}

#[derive(Debug, Deserialize)]
struct SeatData {
    course: i64,
}

async fn enroll(
    stud: &Student,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let seat: SeatData = match serde_json::from_str(&body) {
        Ok(s) => s,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as SeatData: {}", &body, &e
            );
            return respond_bad_request(
                "Unable to deserialize request body.".to_owned()
            );
        },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.enroll(stud.id, seat.course).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
    }
    log::trace!("Student {} enrolled in course {}.", &stud.id, &seat.course);

    populate_catalog(glob).await
}

async fn withdraw(
    stud: &Student,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let seat: SeatData = match serde_json::from_str(&body) {
        Ok(s) => s,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as SeatData: {}", &body, &e
            );
            return respond_bad_request(
                "Unable to deserialize request body.".to_owned()
            );
        },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.withdraw(stud.id, seat.course).await;
        if let Err(e) = res {
            return respond_store_error(e);
        }
    }
    log::trace!("Student {} withdrew from course {}.", &stud.id, &seat.course);

    populate_dashboard(stud, glob).await
}

/// Shared by all three roles: drop the session key presented with the
/// request.
pub(super) async fn logout(
    headers: &HeaderMap,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let key = match headers.get("x-uni-key") {
        Some(k) => match k.to_str() {
            Ok(s) => s.to_owned(),
            Err(_) => { return respond_bad_key(); },
        },
        None => { return respond_bad_key(); },
    };

    let res = glob.read().await.auth().read().await.discard_key(&key).await;
    if let Err(e) = res {
        log::error!("auth::Db::discard_key( {:?} ): {}", &key, &e);
        return text_500(None);
    }

    StatusCode::OK.into_response()
}
