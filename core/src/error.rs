use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job '{job}' is not registered")]
    JobNotFound { job: &'static str },

    #[error("Job '{job}': subscriber '{subscriber}' failed: {source:#}")]
    CallbackFailed {
        job:        &'static str,
        subscriber: String,
        source:     anyhow::Error,
    },

    #[error("Physics backend '{backend}' steps itself; disable its automatic simulation")]
    AutoSimulationEnabled { backend: String },

    #[error("Config error: {0}")]
    Config(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type JobResult<T> = Result<T, JobError>;
