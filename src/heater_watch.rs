use log::debug;
use log::error;
use log::info;
use std::time::Duration;

use crate::heater_api::FetchError;
use crate::heater_api::StatusSource;
use crate::relay_ctl::Relay;
use crate::relay_types::HeaterStatus;
use crate::relay_types::RelayState;
use crate::shutdown::Shutdown;

/// Keeps one relay in line with the state the API wants it in.
///
/// The first request is a plain GET. Once a status has been received, every
/// following request long-polls from its version, so the server paces the
/// loop. Faults are logged and retried after a fixed delay without touching
/// the observed version.
pub struct HeaterWatch<S, R> {
    source: S,
    relay: R,
    retry_delay: Duration,
    shutdown: Shutdown,
    observed_version: Option<i64>,
}

impl<S, R> HeaterWatch<S, R>
where
    S: StatusSource,
    R: Relay,
{
    pub fn new(source: S, relay: R, retry_delay: Duration, shutdown: Shutdown) -> Self {
        Self {
            source,
            relay,
            retry_delay,
            shutdown,
            observed_version: None,
        }
    }

    pub fn relay_id(&self) -> &str {
        self.source.relay_id()
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn observed_version(&self) -> Option<i64> {
        self.observed_version
    }

    /// Runs until shutdown is triggered.
    pub fn run(&mut self) {
        info!(
            "Watching heater '{}' with relay '{}'",
            self.relay_id(),
            self.relay().id()
        );

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.poll_once() {
                error!(
                    "Failed to poll heater '{}': {:#}",
                    self.relay_id(),
                    anyhow::Error::new(e)
                );
                debug!(
                    "Retrying heater '{}' in {:?}",
                    self.relay_id(),
                    self.retry_delay
                );
                if self.shutdown.wait_timeout(self.retry_delay) {
                    break;
                }
            }
        }

        info!(
            "Stopped watching heater '{}' at version {:?}",
            self.relay_id(),
            self.observed_version()
        );
    }

    /// One request/actuate round. Any well-formed status advances the
    /// observed version, including one with an unrecognized value. A negative
    /// version counts as unset, so the next request is a plain GET again.
    pub fn poll_once(&mut self) -> Result<HeaterStatus, FetchError> {
        let status = self.source.fetch(self.observed_version)?;
        debug!("Heater '{}' reported {}", self.relay_id(), status);

        match status.state() {
            Some(state) => {
                info!("Setting relay '{}' to '{}'", self.relay_id(), state);
                match state {
                    RelayState::On => self.relay.set_on(),
                    RelayState::Off => self.relay.set_off(),
                }
            }
            None => error!(
                "Got unknown value '{}' for heater '{}' at version {}",
                status.value,
                self.relay_id(),
                status.version
            ),
        }

        self.observed_version = (status.version >= 0).then_some(status.version);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heater_api::HttpStatusSource;
    use crate::heater_api::http_client;
    use crate::relay_types::RelayState::*;
    use mockito::Server;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::thread;

    /// Replays canned results and records the version each request carried.
    /// Triggers shutdown once the script is exhausted.
    struct ScriptedSource {
        script: VecDeque<Result<HeaterStatus, FetchError>>,
        requests: Vec<Option<i64>>,
        shutdown: Shutdown,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<HeaterStatus, FetchError>>, shutdown: &Shutdown) -> Self {
            Self {
                script: script.into(),
                requests: Vec::new(),
                shutdown: shutdown.clone(),
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn relay_id(&self) -> &str {
            "garage"
        }

        fn fetch(&mut self, observed_version: Option<i64>) -> Result<HeaterStatus, FetchError> {
            self.requests.push(observed_version);
            match self.script.pop_front() {
                Some(result) => result,
                None => {
                    self.shutdown.trigger();
                    Err(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE))
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingRelay {
        calls: Vec<RelayState>,
        stop_after: Option<(usize, Shutdown)>,
    }

    impl Relay for RecordingRelay {
        fn id(&self) -> &str {
            "garage"
        }

        fn set(&mut self, state: RelayState) {
            self.calls.push(state);
            if let Some((limit, shutdown)) = &self.stop_after {
                if self.calls.len() >= *limit {
                    shutdown.trigger();
                }
            }
        }
    }

    fn ok(value: &str, version: i64) -> Result<HeaterStatus, FetchError> {
        Ok(HeaterStatus::new(value, version))
    }

    fn server_error() -> Result<HeaterStatus, FetchError> {
        Err(FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR))
    }

    fn bad_json() -> Result<HeaterStatus, FetchError> {
        Err(FetchError::Decode {
            message: "expected value".to_string(),
            body: "<html>".to_string(),
        })
    }

    fn watch(
        script: Vec<Result<HeaterStatus, FetchError>>,
    ) -> HeaterWatch<ScriptedSource, RecordingRelay> {
        let shutdown = Shutdown::new();
        let source = ScriptedSource::new(script, &shutdown);
        HeaterWatch::new(
            source,
            RecordingRelay::default(),
            Duration::from_millis(1),
            shutdown,
        )
    }

    #[test]
    fn actuates_each_status_and_long_polls_from_its_version() {
        let mut watch = watch(vec![ok("on", 1), ok("off", 2), ok("on", 5)]);
        watch.run();

        assert_eq!(watch.relay.calls, vec![On, Off, On]);
        assert_eq!(
            watch.source.requests,
            vec![None, Some(1), Some(2), Some(5)]
        );
        assert_eq!(watch.observed_version(), Some(5));
    }

    #[test]
    fn repeated_values_are_actuated_again() {
        let mut watch = watch(vec![ok("on", 1), ok("on", 2)]);
        watch.run();

        assert_eq!(watch.relay.calls, vec![On, On]);
    }

    #[test]
    fn faults_before_first_status_keep_plain_requests() {
        let mut watch = watch(vec![server_error(), bad_json(), ok("off", 3)]);
        watch.run();

        assert_eq!(watch.relay.calls, vec![Off]);
        assert_eq!(watch.source.requests, vec![None, None, None, Some(3)]);
    }

    #[test]
    fn faults_while_tracking_repeat_the_same_version() {
        let mut watch = watch(vec![
            ok("on", 4),
            server_error(),
            bad_json(),
            Err(FetchError::InvalidUrl {
                url: "http://api.test".to_string(),
                message: "broken".to_string(),
            }),
            ok("off", 6),
        ]);
        watch.run();

        assert_eq!(watch.relay.calls, vec![On, Off]);
        assert_eq!(
            watch.source.requests,
            vec![None, Some(4), Some(4), Some(4), Some(4), Some(6)]
        );
    }

    #[test]
    fn unknown_value_is_not_actuated_but_advances_version() {
        let mut watch = watch(vec![ok("on", 1), ok("standby", 2), ok("off", 3)]);
        watch.run();

        assert_eq!(watch.relay.calls, vec![On, Off]);
        assert_eq!(
            watch.source.requests,
            vec![None, Some(1), Some(2), Some(3)]
        );
    }

    #[test]
    fn negative_version_falls_back_to_plain_requests() {
        let mut watch = watch(vec![ok("on", -1), ok("off", 0), ok("on", -3), ok("off", 7)]);
        watch.run();

        assert_eq!(watch.relay.calls, vec![On, Off, On, Off]);
        assert_eq!(
            watch.source.requests,
            vec![None, None, Some(0), None, Some(7)]
        );
        assert_eq!(watch.observed_version(), Some(7));
    }

    #[test]
    fn poll_once_leaves_version_untouched_on_fault() {
        let mut watch = watch(vec![ok("on", 9), server_error()]);

        assert_eq!(watch.poll_once().unwrap(), HeaterStatus::new("on", 9));
        assert_eq!(watch.observed_version(), Some(9));

        assert!(watch.poll_once().is_err());
        assert_eq!(watch.observed_version(), Some(9));
        assert_eq!(watch.relay.calls, vec![On]);
    }

    #[test]
    fn shutdown_interrupts_retry_delay() {
        let shutdown = Shutdown::new();
        let source = ScriptedSource::new(vec![server_error()], &Shutdown::new());
        let mut watch = HeaterWatch::new(
            source,
            RecordingRelay::default(),
            Duration::from_secs(3600),
            shutdown.clone(),
        );

        let handle = thread::spawn(move || {
            watch.run();
            watch
        });
        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();

        let watch = handle.join().unwrap();
        assert!(watch.source.requests.len() <= 1);
        assert_eq!(watch.observed_version(), None);
    }

    #[test]
    fn does_not_poll_after_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let source = ScriptedSource::new(vec![ok("on", 1)], &shutdown);
        let mut watch = HeaterWatch::new(
            source,
            RecordingRelay::default(),
            Duration::from_millis(1),
            shutdown,
        );
        watch.run();

        assert!(watch.source.requests.is_empty());
        assert!(watch.relay.calls.is_empty());
    }

    #[test]
    fn drives_relay_from_http_api() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/users/alice/heaters/garage")
            .with_status(200)
            .with_body(r#"{"Value":"on","Version":1}"#)
            .expect(1)
            .create();

        let shutdown = Shutdown::new();
        let client = http_client(Duration::from_secs(5)).unwrap();
        let source = HttpStatusSource::new(client, server.url(), "alice", "garage");
        let relay = RecordingRelay {
            calls: Vec::new(),
            stop_after: Some((1, shutdown.clone())),
        };
        let mut watch = HeaterWatch::new(source, relay, Duration::from_millis(1), shutdown);
        watch.run();

        mock.assert();
        assert_eq!(watch.relay.calls, vec![On]);
        assert_eq!(watch.observed_version(), Some(1));
    }
}
