use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Discord API {route} failed status={status} body={body}")]
    DiscordStatus {
        route: String,
        status: u16,
        body: String,
    },

    #[error("Discord gateway error: {0}")]
    Gateway(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl AppError {
    /// Status code of a failed Discord REST call, if that is what this is.
    pub fn discord_status(&self) -> Option<u16> {
        match self {
            Self::DiscordStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
