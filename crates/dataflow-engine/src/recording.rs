//! Recording of a run's event log
//!
//! `ExecutionRecorder` is an `EventSink`: attach it to a processor and it
//! keeps every event of the run in order. The recording serializes to
//! `{ "version": 1, "recording": { ... } }` and can be fed back through
//! `GraphProcessor::replay_recording`.

use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::events::{EventError, EventKind, EventSink, ProcessorEvent, RecordedEvent};

/// Serialized format version written by `to_json`
pub const RECORDING_VERSION: u64 = 1;

/// Which high-volume events to keep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderOptions {
    pub include_partial_outputs: bool,
    pub include_trace: bool,
}

/// An ordered event log of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub recording_id: String,
    pub events: Vec<RecordedEvent>,
    pub start_ts: i64,
    #[serde(default)]
    pub finish_ts: Option<i64>,
}

impl Recording {
    fn new() -> Self {
        Self {
            recording_id: uuid::Uuid::new_v4().to_string(),
            events: Vec::new(),
            start_ts: chrono::Utc::now().timestamp_millis(),
            finish_ts: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SerializedRecording {
    version: u64,
    recording: Recording,
}

pub struct ExecutionRecorder {
    options: RecorderOptions,
    recording: Mutex<Recording>,
}

impl ExecutionRecorder {
    pub fn new() -> Self {
        Self::with_options(RecorderOptions::default())
    }

    pub fn with_options(options: RecorderOptions) -> Self {
        Self {
            options,
            recording: Mutex::new(Recording::new()),
        }
    }

    pub fn recording_id(&self) -> String {
        self.recording.lock().recording_id.clone()
    }

    /// Snapshot of the recorded events, in emission order
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.recording.lock().events.clone()
    }

    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }

    /// Whether a `done`, `error` or `abort` event has been recorded
    pub fn finished(&self) -> bool {
        self.recording.lock().finish_ts.is_some()
    }

    pub fn to_json(&self) -> Result<String> {
        let serialized = SerializedRecording {
            version: RECORDING_VERSION,
            recording: self.recording(),
        };
        Ok(serde_json::to_string(&serialized)?)
    }

    /// Parse a serialized recording
    ///
    /// Recordings written by another format version are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        if version != RECORDING_VERSION {
            return Err(EngineError::UnsupportedRecordingVersion(version));
        }

        let serialized: SerializedRecording = serde_json::from_value(value)?;
        Ok(Self {
            options: RecorderOptions {
                include_partial_outputs: true,
                include_trace: true,
            },
            recording: Mutex::new(serialized.recording),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        log::debug!("Saved recording to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl Default for ExecutionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ExecutionRecorder {
    fn send(&self, event: &RecordedEvent) -> std::result::Result<(), EventError> {
        match event.event.kind() {
            EventKind::PartialOutput if !self.options.include_partial_outputs => return Ok(()),
            EventKind::Trace if !self.options.include_trace => return Ok(()),
            _ => {}
        }

        let mut recording = self.recording.lock();
        if let ProcessorEvent::Start { .. } = event.event {
            recording.start_ts = event.ts;
        }
        if event.event.is_terminal() {
            recording.finish_ts = Some(event.ts);
        }
        recording.events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GraphOutputs, Outputs, ProcessId};
    use crate::value::DataValue;

    fn record(recorder: &ExecutionRecorder, event: ProcessorEvent) {
        recorder.send(&RecordedEvent::now(event)).unwrap();
    }

    #[test]
    fn test_options_filter_high_volume_events() {
        let recorder = ExecutionRecorder::new();
        record(&recorder, ProcessorEvent::Trace("noise".into()));
        record(
            &recorder,
            ProcessorEvent::PartialOutput {
                node_id: "n".into(),
                outputs: Outputs::new(),
                index: 0,
                process_id: ProcessId::from("p"),
            },
        );
        assert!(recorder.events().is_empty());

        let verbose = ExecutionRecorder::with_options(RecorderOptions {
            include_partial_outputs: true,
            include_trace: true,
        });
        record(&verbose, ProcessorEvent::Trace("kept".into()));
        assert_eq!(verbose.events().len(), 1);
    }

    #[test]
    fn test_finished_after_terminal_event() {
        let recorder = ExecutionRecorder::new();
        record(&recorder, ProcessorEvent::Pause);
        assert!(!recorder.finished());

        record(
            &recorder,
            ProcessorEvent::Done {
                results: GraphOutputs::new(),
            },
        );
        assert!(recorder.finished());
    }

    #[test]
    fn test_json_round_trip() {
        let recorder = ExecutionRecorder::new();
        let mut results = GraphOutputs::new();
        results.insert("answer".into(), DataValue::Number(42.0));
        record(&recorder, ProcessorEvent::Done { results });

        let json = recorder.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["recording"]["events"][0]["type"], "done");

        let restored = ExecutionRecorder::from_json(&json).unwrap();
        assert_eq!(restored.recording(), recorder.recording());
    }

    #[test]
    fn test_round_trip_keeps_non_finite_outputs() {
        let recorder = ExecutionRecorder::new();
        let mut outputs = Outputs::new();
        outputs.insert("ratio".into(), DataValue::Number(f64::NAN));
        outputs.insert("limits".into(), DataValue::NumberArray(vec![f64::NEG_INFINITY, 0.5]));
        record(
            &recorder,
            ProcessorEvent::NodeFinish {
                node_id: "divide".into(),
                outputs: outputs.clone(),
                process_id: ProcessId::from("p"),
            },
        );
        record(&recorder, ProcessorEvent::Done { results: outputs });

        let json = recorder.to_json().unwrap();
        let restored = ExecutionRecorder::from_json(&json).unwrap();
        assert_eq!(restored.events().len(), 2);

        let written: serde_json::Value = serde_json::from_str(&json).unwrap();
        let rewritten: serde_json::Value = serde_json::from_str(&restored.to_json().unwrap()).unwrap();
        assert_eq!(written, rewritten);

        match &restored.events()[1].event {
            ProcessorEvent::Done { results } => {
                assert!(matches!(results["ratio"], DataValue::Number(n) if n.is_nan()));
                assert_eq!(results["limits"], DataValue::NumberArray(vec![f64::NEG_INFINITY, 0.5]));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_rejects_other_versions() {
        let err = ExecutionRecorder::from_json(r#"{"version":2,"recording":{}}"#)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnsupportedRecordingVersion(2)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let recorder = ExecutionRecorder::new();
        record(&recorder, ProcessorEvent::Resume);
        recorder.save(&path).unwrap();

        let loaded = ExecutionRecorder::load(&path).unwrap();
        assert_eq!(loaded.recording_id(), recorder.recording_id());
        assert_eq!(loaded.events(), recorder.events());
    }
}
