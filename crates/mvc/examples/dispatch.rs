use http::{Method, StatusCode};
use http_body_util::BodyExt;
use micro_mvc::cors::CrossOrigin;
use micro_mvc::extract::{Form, Json};
use micro_mvc::session::{FileSessionStore, Session, SessionConfig};
use micro_mvc::{Dispatcher, Mapping, PathVariables, RouteRegistry, Scope, View, handler_fn};
use serde::{Deserialize, Serialize};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Deserialize, Serialize, Debug)]
pub struct User {
    name: String,
    zip: String,
}

async fn list_users() -> Json<Vec<User>> {
    Json(vec![User { name: "zava".into(), zip: "100000".into() }])
}

async fn show_user(variables: PathVariables) -> String {
    format!("user {}", variables.get("id").unwrap_or_default())
}

async fn create_user(Form(user): Form<User>) -> (StatusCode, Json<User>) {
    (StatusCode::CREATED, Json(user))
}

async fn index() -> View {
    View::action("redirect:/users")
}

async fn counter(session: Session) -> String {
    let count = session.get::<u64>("count").unwrap_or_default() + 1;
    if let Err(e) = session.set("count", count) {
        return format!("failed to update session: {e}");
    }
    format!("visit #{count}")
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let users = Scope::new(Mapping::builder().path("/users").build().expect("valid mapping"))
        .cross_origin(CrossOrigin::new().origin("http://localhost:3000"))
        .route(Mapping::builder().method(Method::GET).produces("application/json").build().unwrap(), handler_fn(list_users))
        .route(
            Mapping::builder().method(Method::POST).consumes("application/x-www-form-urlencoded").build().unwrap(),
            handler_fn(create_user),
        )
        .route(Mapping::builder().path("/{id}").method(Method::GET).build().unwrap(), handler_fn(show_user));

    let registry = RouteRegistry::builder()
        .route(Mapping::builder().path("/").method(Method::GET).build().unwrap(), handler_fn(index))
        .route(Mapping::builder().path("/counter").method(Method::GET).build().unwrap(), handler_fn(counter))
        .scope(users)
        .build();

    let session_dir = std::env::temp_dir().join("micro-mvc-demo-sessions");
    let dispatcher = Dispatcher::builder(registry)
        .session_store(FileSessionStore::new(session_dir), SessionConfig::default())
        .build();

    let requests = vec![
        http::Request::get("/").body(String::new()).unwrap(),
        http::Request::get("/users").body(String::new()).unwrap(),
        http::Request::get("/users/42").body(String::new()).unwrap(),
        http::Request::post("/users")
            .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("name=hello&zip=world".to_string())
            .unwrap(),
        http::Request::delete("/users").body(String::new()).unwrap(),
        http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/users")
            .header(http::header::ORIGIN, "http://localhost:3000")
            .header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(String::new())
            .unwrap(),
        http::Request::get("/counter").body(String::new()).unwrap(),
    ];

    for request in requests {
        let (method, uri) = (request.method().clone(), request.uri().clone());
        let response = dispatcher.dispatch(request).await;
        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(e) => format!("<body error: {e}>"),
        };
        info!(%method, %uri, status = %parts.status, headers = ?parts.headers, body = %body, "response");
    }
}
