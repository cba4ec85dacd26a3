//! Classification of finished requests.

use crate::completion::{Completion, Outcome};
use crate::engine::EngineResponse;
use crate::error::TransportFailure;
use crate::response::Response;
use crate::Error;

use super::Mode;

/// The callback invoked by the engine once a request finishes.
///
/// The response is written to `completion` whatever the outcome. Serial requests report
/// failures as errors; parallel requests only record them and mark the completion
/// finished.
pub(super) fn handler(
    completion: Completion,
    mode: Mode,
) -> impl FnOnce(EngineResponse) -> Result<(), Error> + Send + 'static {
    move |response| {
        let outcome = classify(&response);
        completion.record(Response::from_engine(&response), outcome.clone());

        match mode {
            Mode::Parallel => {
                completion.finish();
                if let Some(failure) = outcome.failure() {
                    tracing::debug!(%failure, "parallel request failed");
                }
                Ok(())
            }
            Mode::Serial => match outcome {
                Outcome::Completed => Ok(()),
                Outcome::TimedOut(failure) => Err(Error::Timeout(failure)),
                Outcome::ConnectionFailed(failure) => Err(Error::ConnectionFailed(failure)),
            },
        }
    }
}

/// Decide how a request ended.
///
/// A timeout takes priority. Otherwise a request failed to connect when it is not a
/// stubbed response and either no status was received or the engine reported an error.
/// HTTP error statuses are completed requests.
pub(crate) fn classify(response: &EngineResponse) -> Outcome {
    let failure = || TransportFailure::new(response.return_code, response.return_message.clone());

    if response.timed_out() {
        Outcome::TimedOut(failure())
    } else if !response.mock && (response.status == 0 || !response.return_code.is_ok()) {
        Outcome::ConnectionFailed(failure())
    } else {
        Outcome::Completed
    }
}
