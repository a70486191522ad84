//! Route registration and the generated `OpenAPI` document.
//!
//! Add new endpoints here via `.routes(routes!(...))` so they are both served
//! and documented. Routes added outside (like `/` and `OPTIONS /health`) are
//! intentionally undocumented.

use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::handlers::{agent, buyer, farmer, hauler, health, session, team, zones};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the
    // route to the OpenAPI document.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(session::request_login_otp))
        .routes(routes!(session::verify_login_otp))
        .routes(routes!(session::login))
        .routes(routes!(session::logout))
        .routes(routes!(session::refresh_token))
        .routes(routes!(session::verify_token))
        .routes(routes!(farmer::request_registration_otp))
        .routes(routes!(farmer::create_account))
        .routes(routes!(farmer::create_profile))
        .routes(routes!(farmer::update_profile))
        .routes(routes!(farmer::save_farm_profile))
        .routes(routes!(farmer::add_payment_details))
        .routes(routes!(farmer::verify_upi))
        .routes(routes!(farmer::set_pin))
        .routes(routes!(farmer::login_with_pin))
        .routes(routes!(buyer::register_buyer))
        .routes(routes!(buyer::verify_buyer_otp))
        .routes(routes!(buyer::login_buyer))
        .routes(routes!(buyer::logout_buyer))
        .routes(routes!(buyer::forgot_password))
        .routes(routes!(buyer::reset_password))
        .routes(routes!(team::invite_team_member))
        .routes(routes!(team::accept_invitation))
        .routes(routes!(team::validate_invitation_token))
        .routes(routes!(team::list_team_members))
        .routes(routes!(team::update_member_role))
        .routes(routes!(team::deactivate_team_member))
        .routes(routes!(team::delete_team_member))
        .routes(routes!(team::resend_invitation))
        .routes(routes!(hauler::register_step1))
        .routes(routes!(hauler::verify_otp))
        .routes(routes!(hauler::add_vehicle_info))
        .routes(routes!(hauler::add_license_info))
        .routes(routes!(hauler::add_payment_info))
        .routes(routes!(hauler::submit_registration))
        .routes(routes!(hauler::vehicle_eligibility))
        .routes(routes!(hauler::get_profile))
        .routes(routes!(hauler::admin::get_pending_verifications))
        .routes(routes!(hauler::admin::verify_hauler))
        .routes(routes!(agent::create_agent))
        .routes(routes!(agent::list_agents))
        .routes(routes!(agent::get_agent_details))
        .routes(routes!(agent::first_login))
        .routes(routes!(agent::set_pin))
        .routes(routes!(agent::complete_training))
        .routes(routes!(agent::get_dashboard))
        .routes(routes!(agent::deactivate_agent))
        .routes(routes!(agent::reassign_zone))
        .routes(routes!(zones::get_zones))
        .routes(routes!(zones::get_child_zones))
        .routes(routes!(zones::get_zone_hierarchy));

    let tags = [
        ("session", "Login, logout, and token lifecycle"),
        ("farmer", "Farmer onboarding steps"),
        ("buyer", "Buyer registration and password flows"),
        ("team", "Buyer team membership and invitations"),
        ("hauler", "Transporter registration steps"),
        ("hauler-admin", "Admin verification queue"),
        ("agent", "Field agent provisioning"),
        ("zones", "Zone hierarchy"),
        ("health", "Service health"),
    ]
    .into_iter()
    .map(|(name, description)| {
        let mut tag = Tag::new(name);
        tag.description = Some(description.to_string());
        tag
    })
    .collect();
    router.get_openapi_mut().tags = Some(tags);

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
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

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
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact.expect("contact");
        assert_eq!(contact.name.as_deref(), Some("Mandi Platform Team"));
        assert_eq!(contact.email.as_deref(), Some("platform@mandi.dev"));
    }

    #[test]
    fn openapi_covers_the_rpc_surface() {
        let spec = openapi();
        for path in [
            "/v1/auth/login",
            "/v1/auth/login/otp/request",
            "/v1/auth/login/otp/verify",
            "/v1/auth/refresh",
            "/v1/auth/verify",
            "/v1/farmer/account",
            "/v1/farmer/pin",
            "/v1/buyer/register",
            "/v1/buyer/verify-otp",
            "/v1/buyer/reset-password",
            "/v1/team/invite",
            "/v1/team/accept",
            "/v1/team/members",
            "/v1/team/members/role",
            "/v1/hauler/register/step1",
            "/v1/hauler/register/submit",
            "/v1/hauler/verifications",
            "/v1/hauler/eligibility",
            "/v1/agents",
            "/v1/agents/first-login",
            "/v1/agents/set-pin",
            "/v1/zones/hierarchy",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn openapi_declares_tags() {
        let spec = openapi();
        let tags = spec.tags.unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "team"));
        assert!(tags.iter().any(|tag| tag.name == "hauler-admin"));
    }
}
