//! Pipeline stages and the artifacts each one produces.
//!
//! The pipeline is fixed: separation runs on the original upload, then
//! transcription runs on the separated vocals. Each stage writes its
//! artifacts to conventional locations (see [`crate::storage_keys`]) so the
//! next stage can find its input without handoff metadata.

use serde::{Deserialize, Serialize};

/// A named output of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Logical artifact name used as the key in `artifact_locations`.
    pub name: &'static str,
    /// Object name under the job's output prefix.
    pub file_name: &'static str,
}

/// Stem names produced by the separation stage.
pub const STEM_NAMES: [&str; 4] = ["drums", "bass", "other", "vocals"];

/// Logical name of the transcript artifact.
pub const TRANSCRIPT_ARTIFACT: &str = "transcript";

const SEPARATION_ARTIFACTS: [ArtifactSpec; 4] = [
    ArtifactSpec { name: "drums", file_name: "drums.wav" },
    ArtifactSpec { name: "bass", file_name: "bass.wav" },
    ArtifactSpec { name: "other", file_name: "other.wav" },
    ArtifactSpec { name: "vocals", file_name: "vocals.wav" },
];

const TRANSCRIPTION_ARTIFACTS: [ArtifactSpec; 1] = [ArtifactSpec {
    name: TRANSCRIPT_ARTIFACT,
    file_name: "lyrics.json",
}];

/// One sequential unit of external processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Separation,
    Transcription,
}

impl StageKind {
    /// The pipeline, in execution order.
    pub const PIPELINE: [StageKind; 2] = [StageKind::Separation, StageKind::Transcription];

    /// Name written to `jobs.stage` and carried in progress events.
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Separation => "separation",
            StageKind::Transcription => "transcription",
        }
    }

    /// Artifacts this stage is expected to write.
    pub fn artifacts(self) -> &'static [ArtifactSpec] {
        match self {
            StageKind::Separation => &SEPARATION_ARTIFACTS,
            StageKind::Transcription => &TRANSCRIPTION_ARTIFACTS,
        }
    }

    /// Output of a previous stage this stage reads, or `None` when it reads
    /// the original upload.
    pub fn input_artifact(self) -> Option<&'static str> {
        match self {
            StageKind::Separation => None,
            StageKind::Transcription => Some("vocals.wav"),
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<StageKind> {
        let pos = Self::PIPELINE.iter().position(|s| *s == self)?;
        Self::PIPELINE.get(pos + 1).copied()
    }

    /// The first stage of the pipeline.
    pub fn first() -> StageKind {
        Self::PIPELINE[0]
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_order() {
        assert_eq!(StageKind::first(), StageKind::Separation);
        assert_eq!(StageKind::Separation.next(), Some(StageKind::Transcription));
        assert_eq!(StageKind::Transcription.next(), None);
    }

    #[test]
    fn separation_produces_all_stems() {
        let names: Vec<_> = StageKind::Separation
            .artifacts()
            .iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, STEM_NAMES);
    }

    #[test]
    fn transcription_reads_vocals() {
        assert_eq!(StageKind::Transcription.input_artifact(), Some("vocals.wav"));
        assert_eq!(StageKind::Separation.input_artifact(), None);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&StageKind::Transcription).unwrap();
        assert_eq!(json, "\"transcription\"");
    }
}
