//! Consumers of fused per-frame records.

use std::io::Write;
use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ProctorError, ProctorResult};

use super::FrameReport;

/// Shape of each emitted record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputVariant {
    /// Exactly the six violation flags.
    #[default]
    Flags,
    /// Face count, pose label, phone flag and (with `annotate`) the image.
    Stream,
    /// Everything measured for the frame.
    Detailed,
}

impl OutputVariant {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flags" => Some(Self::Flags),
            "stream" => Some(Self::Stream),
            "detailed" => Some(Self::Detailed),
            _ => None,
        }
    }

    pub fn render(self, report: &FrameReport) -> ProctorResult<Value> {
        let value = match self {
            OutputVariant::Flags => serde_json::to_value(report.flags)?,
            OutputVariant::Stream => {
                let mut value = json!({
                    "face_count": report.face_count,
                    "head_pose": report.head_pose,
                    "phone_detected": report.flags.phone_detected,
                });
                if let (Some(image), Some(map)) = (&report.annotated_image, value.as_object_mut())
                {
                    map.insert("annotated_image".into(), Value::String(image.clone()));
                }
                value
            }
            OutputVariant::Detailed => json!({
                "sequence": report.sequence,
                "flags": report.flags,
                "face_count": report.face_count,
                "head_pose": report.head_pose,
                "pose": report.pose,
                "gaze_ratio": report.gaze_ratio,
            }),
        };
        Ok(value)
    }
}

pub trait FrameSink {
    /// Deliver one record. An error means the consumer is gone.
    fn emit(&mut self, report: &FrameReport) -> ProctorResult<()>;

    fn flush(&mut self) -> ProctorResult<()> {
        Ok(())
    }
}

/// Newline-delimited JSON onto any writer (stdout, a socket, a file).
pub struct JsonLinesSink<W: Write> {
    writer: W,
    variant: OutputVariant,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W, variant: OutputVariant) -> Self {
        Self {
            writer,
            variant,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Flush and hand the writer back.
    pub fn finish(mut self) -> ProctorResult<W> {
        FrameSink::flush(&mut self)?;
        Ok(self.writer)
    }
}

impl<W: Write> FrameSink for JsonLinesSink<W> {
    fn emit(&mut self, report: &FrameReport) -> ProctorResult<()> {
        let value = self.variant.render(report)?;
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .map_err(|e| ProctorError::Transport(e.to_string()))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> ProctorResult<()> {
        self.writer
            .flush()
            .map_err(|e| ProctorError::Transport(e.to_string()))
    }
}

/// Hands records to another thread.
pub struct ChannelSink {
    tx: mpsc::Sender<FrameReport>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<FrameReport>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<FrameReport>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn emit(&mut self, report: &FrameReport) -> ProctorResult<()> {
        self.tx
            .send(report.clone())
            .map_err(|_| ProctorError::Transport("record receiver dropped".into()))
    }
}

impl FrameSink for Vec<FrameReport> {
    fn emit(&mut self, report: &FrameReport) -> ProctorResult<()> {
        self.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{HeadPose, PoseEstimate};
    use crate::fusion::ProctorFlags;

    fn report() -> FrameReport {
        FrameReport {
            sequence: 4,
            flags: ProctorFlags {
                phone_detected: true,
                ..ProctorFlags::default()
            },
            face_count: 1,
            head_pose: HeadPose::Left,
            pose: Some(PoseEstimate {
                yaw: -14.0,
                pitch: 2.0,
                roll: 0.5,
            }),
            gaze_ratio: Some(0.1),
            annotated_image: None,
        }
    }

    #[test]
    fn flags_variant_has_exactly_six_keys() {
        let value = OutputVariant::Flags.render(&report()).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 6);
        assert_eq!(value["phone_detected"], Value::Bool(true));
    }

    #[test]
    fn stream_variant_omits_missing_image() {
        let value = OutputVariant::Stream.render(&report()).unwrap();
        assert_eq!(value["head_pose"], "Left");
        assert_eq!(value["face_count"], 1);
        assert!(value.get("annotated_image").is_none());

        let mut with_image = report();
        with_image.annotated_image = Some("data:image/jpeg;base64,AAAA".into());
        let value = OutputVariant::Stream.render(&with_image).unwrap();
        assert_eq!(value["annotated_image"], "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let mut sink = JsonLinesSink::new(Vec::new(), OutputVariant::Detailed);
        sink.emit(&report()).unwrap();
        sink.emit(&report()).unwrap();
        assert_eq!(sink.written(), 2);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["sequence"], 4);
        assert_eq!(parsed["pose"]["yaw"], -14.0);
    }

    struct ClosedPipe {
        buffered: Vec<u8>,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffered.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reader went away"))
        }
    }

    #[test]
    fn finish_reports_failed_flush() {
        let mut sink = JsonLinesSink::new(ClosedPipe { buffered: Vec::new() }, OutputVariant::Flags);
        sink.emit(&report()).unwrap();
        match sink.finish() {
            Err(ProctorError::Transport(msg)) => assert!(msg.contains("reader went away")),
            other => panic!("expected transport error, got {:?}", other.map(|w| w.buffered)),
        }

        let sink = JsonLinesSink::new(Vec::new(), OutputVariant::Flags);
        assert!(sink.finish().unwrap().is_empty());
    }

    #[test]
    fn channel_sink_reports_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::channel();
        sink.emit(&report()).unwrap();
        assert_eq!(rx.recv().unwrap().sequence, 4);
        drop(rx);
        assert!(matches!(sink.emit(&report()), Err(ProctorError::Transport(_))));
    }
}
