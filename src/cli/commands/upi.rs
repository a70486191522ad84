use clap::{Arg, ArgAction, Command};

pub const ARG_UPI_ENABLED: &str = "upi-enabled";
pub const ARG_UPI_URL: &str = "upi-url";
pub const ARG_UPI_API_KEY: &str = "upi-api-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_UPI_ENABLED)
                .long("upi-enabled")
                .help("Verify UPI VPAs and IFSC codes against the provider")
                .action(ArgAction::SetTrue)
                .env("MANDI_UPI_ENABLED"),
        )
        .arg(
            Arg::new(ARG_UPI_URL)
                .long("upi-url")
                .help("UPI/IFSC validation provider base URL")
                .env("MANDI_UPI_URL")
                .requires(ARG_UPI_API_KEY),
        )
        .arg(
            Arg::new(ARG_UPI_API_KEY)
                .long("upi-api-key")
                .help("UPI provider API key")
                .env("MANDI_UPI_API_KEY"),
        )
}
