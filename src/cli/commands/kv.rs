use clap::{Arg, Command};

pub const ARG_KV_URL: &str = "kv-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_KV_URL)
            .long("kv-url")
            .help("Key-value store URL for OTP material and rate limits")
            .default_value("redis://127.0.0.1:6379")
            .env("MANDI_KV_URL"),
    )
}
