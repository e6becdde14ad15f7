use thiserror::Error;

/// Classification of a failed completion request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rate limit reached")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider did not answer within {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("request cancelled by caller")]
    Cancelled,
    #[error("provider misconfigured: {0}")]
    Misconfigured(String),
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
    #[error("provider transport failure: {0}")]
    Transport(String),
    /// A follow-up round failed after capabilities had already run. Never
    /// retried from the start, since that would run them again.
    #[error("provider failed after {capabilities_run} capability call(s) had run: {cause}")]
    DispatchInterrupted { capabilities_run: usize, cause: Box<ProviderError> },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "provider_timeout",
            Self::Cancelled => "cancelled",
            Self::Misconfigured(_) => "misconfigured",
            Self::UnexpectedResponse(_) => "unexpected_response",
            Self::Transport(_) => "transport",
            Self::DispatchInterrupted { .. } => "dispatch_interrupted",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("conversation `{0}` not found")]
    NotFound(String),
    #[error("conversation `{0}` lock poisoned by a panicked writer")]
    Poisoned(String),
}

/// Failure of one orchestrated turn. Callers never see this as an `Err`;
/// the runtime folds it into an apologetic response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("provider still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ProviderError },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TurnError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::Cancelled))
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "bad_request",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Provider(error) => error.category(),
            Self::Store(_) => "store",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyMessage => {
                "I did not receive a question. Type a request and try again.".to_owned()
            }
            Self::RetriesExhausted { attempts, last } => {
                let cause = match last {
                    ProviderError::RateLimited { .. } => "the language model is rate limiting requests",
                    ProviderError::Timeout { .. } => "the language model kept timing out",
                    _ => "the language model kept failing",
                };
                format!(
                    "I'm sorry, I could not complete your request because {cause} \
                     ({attempts} attempts). You can:\n\
                     - wait a minute and try again\n\
                     - simplify the request or split it into smaller steps\n\
                     - ask an administrator to check the model deployment's capacity and quota"
                )
            }
            Self::Provider(ProviderError::Cancelled) => "The request was cancelled.".to_owned(),
            Self::Provider(ProviderError::Misconfigured(_)) => {
                "I'm sorry, the assistant is not configured correctly. \
                 Ask an administrator to run `helmsman doctor`."
                    .to_owned()
            }
            Self::Provider(ProviderError::DispatchInterrupted { capabilities_run, .. }) => format!(
                "I started working on your request and ran {capabilities_run} action(s), but lost \
                 contact with the language model before it could report back. Check the results \
                 of those actions before asking again, so they are not repeated."
            ),
            Self::Provider(_) => {
                "I'm sorry, I ran into a problem talking to the language model. \
                 Please try again shortly."
                    .to_owned()
            }
            Self::Store(_) => {
                "I'm sorry, I could not load this conversation. Start a new one and try again."
                    .to_owned()
            }
        }
    }
}
