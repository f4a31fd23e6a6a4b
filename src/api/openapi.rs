use super::handlers::{auth, health, nav, otp, users};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::signup::signup))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::ticket::validate_ticket))
        .routes(routes!(auth::session::logout))
        .routes(routes!(users::current_user))
        .routes(routes!(users::list_users))
        .routes(routes!(users::get_user, users::delete_user))
        .routes(routes!(users::change_password))
        .routes(routes!(users::update_profile))
        .routes(routes!(otp::send_sms))
        .routes(routes!(otp::send_email))
        .routes(routes!(otp::verify_sms))
        .routes(routes!(otp::verify_email))
        .routes(routes!(nav::list_nav, nav::create_nav))
        .routes(routes!(nav::update_nav, nav::delete_nav));

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and database reachability".to_string());

    let mut user_tag = Tag::new("user");
    user_tag.description = Some("Signup, login, sessions and profiles".to_string());

    let mut otp_tag = Tag::new("otp");
    otp_tag.description = Some("One-time codes over SMS and email".to_string());

    let mut nav_tag = Tag::new("nav");
    nav_tag.description = Some("Navigation tree".to_string());

    router.get_openapi_mut().tags = Some(vec![health_tag, user_tag, otp_tag, nav_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated; only the first one becomes the contact.
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next()?.trim();
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    non_empty(value.trim())
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Split `Name <email>` into its parts.
fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            non_empty(name.trim()),
            non_empty(email.trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
