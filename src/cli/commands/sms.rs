use clap::{Arg, ArgAction, Command};

pub const ARG_SMS_ENABLED: &str = "sms-enabled";
pub const ARG_SMS_URL: &str = "sms-url";
pub const ARG_SMS_SENDER_ID: &str = "sms-sender-id";
pub const ARG_SMS_API_KEY: &str = "sms-api-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMS_ENABLED)
                .long("sms-enabled")
                .help("Dispatch real SMS through the gateway instead of logging")
                .action(ArgAction::SetTrue)
                .env("MANDI_SMS_ENABLED"),
        )
        .arg(
            Arg::new(ARG_SMS_URL)
                .long("sms-url")
                .help("SMS gateway endpoint")
                .env("MANDI_SMS_URL")
                .requires(ARG_SMS_API_KEY),
        )
        .arg(
            Arg::new(ARG_SMS_SENDER_ID)
                .long("sms-sender-id")
                .help("Registered sender id for outbound SMS")
                .default_value("MANDIX")
                .env("MANDI_SMS_SENDER_ID"),
        )
        .arg(
            Arg::new(ARG_SMS_API_KEY)
                .long("sms-api-key")
                .help("SMS gateway API key")
                .env("MANDI_SMS_API_KEY"),
        )
}
