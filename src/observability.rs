use std::fs::File;
use std::path::Path;

use biometrics::{Collector, Counter, Moments, PlainTextEmitter};

use crate::utils::time::now_millis;

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("oceanbot.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("oceanbot.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("oceanbot.client.request_duration_seconds");

pub(crate) static STREAM_TOKENS: Counter = Counter::new("oceanbot.stream.tokens");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("oceanbot.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("oceanbot.stream.bytes");

pub(crate) static CONTROLLER_GENERATIONS: Counter = Counter::new("oceanbot.controller.generations");
pub(crate) static CONTROLLER_BUSY_REJECTIONS: Counter =
    Counter::new("oceanbot.controller.busy_rejections");
pub(crate) static CONTROLLER_CANCELLATIONS: Counter =
    Counter::new("oceanbot.controller.cancellations");
pub(crate) static CONTROLLER_FAILURES: Counter = Counter::new("oceanbot.controller.failures");
pub(crate) static CONTROLLER_RESPONSE_DURATION: Moments =
    Moments::new("oceanbot.controller.response_duration_seconds");

pub(crate) static SENTINEL_HITS: Counter = Counter::new("oceanbot.assembler.sentinel_hits");
pub(crate) static IMAGE_FETCH_FAILURES: Counter =
    Counter::new("oceanbot.assembler.image_fetch_failures");
pub(crate) static TITLE_FALLBACKS: Counter = Counter::new("oceanbot.title.fallbacks");

pub(crate) static STORE_WRITES: Counter = Counter::new("oceanbot.store.writes");
pub(crate) static STORE_SKIPPED_WRITES: Counter = Counter::new("oceanbot.store.skipped_writes");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_TOKENS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&CONTROLLER_GENERATIONS);
    collector.register_counter(&CONTROLLER_BUSY_REJECTIONS);
    collector.register_counter(&CONTROLLER_CANCELLATIONS);
    collector.register_counter(&CONTROLLER_FAILURES);
    collector.register_moments(&CONTROLLER_RESPONSE_DURATION);

    collector.register_counter(&SENTINEL_HITS);
    collector.register_counter(&IMAGE_FETCH_FAILURES);
    collector.register_counter(&TITLE_FALLBACKS);

    collector.register_counter(&STORE_WRITES);
    collector.register_counter(&STORE_SKIPPED_WRITES);
}

/// Write one line per registered sensor to `path`, replacing the file.
pub fn emit_biometrics(collector: &Collector, path: &Path) -> std::io::Result<()> {
    let mut emitter = PlainTextEmitter::new(File::create(path)?);
    collector.emit(&mut emitter, now_millis().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_with_a_fresh_collector() {
        register_biometrics(&Collector::new());
    }

    #[test]
    fn emits_registered_sensors_as_plain_text() {
        let collector = Collector::new();
        register_biometrics(&collector);
        STORE_WRITES.click();
        let path = std::env::temp_dir().join(format!(
            "oceanbot-metrics-{}.txt",
            std::process::id()
        ));
        emit_biometrics(&collector, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("oceanbot.store.writes "))
            .unwrap();
        assert!(line.split(' ').nth(2).unwrap().parse::<u64>().unwrap() >= 1);
        assert!(text.contains("oceanbot.controller.response_duration_seconds"));
    }
}
