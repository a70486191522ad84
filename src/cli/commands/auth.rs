use clap::{Arg, Command};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_REQUEST_TIMEOUT: &str = "request-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long("jwt-secret")
                .help("Secret used to sign access tokens")
                .env("MANDI_JWT_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long("frontend-base-url")
                .help("Browser origin allowed by CORS")
                .default_value("http://localhost:3000")
                .env("MANDI_FRONTEND_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT)
                .long("request-timeout-seconds")
                .help("Deadline applied to every request")
                .default_value("30")
                .env("MANDI_REQUEST_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
