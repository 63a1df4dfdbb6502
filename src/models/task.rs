use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Work that can be queued for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Thumbnail,
    Metadata,
    FaceDetection,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Thumbnail => "thumbnail",
            TaskKind::Metadata => "metadata",
            TaskKind::FaceDetection => "face_detection",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" => Ok(TaskKind::Thumbnail),
            "metadata" => Ok(TaskKind::Metadata),
            "face_detection" => Ok(TaskKind::FaceDetection),
            other => anyhow::bail!("unknown task kind: {}", other),
        }
    }
}

/// `Pending -> Processing -> {Done | Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            other => anyhow::bail!("unknown task status: {}", other),
        }
    }
}

/// Terminal result of one job, handed to the repository.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done(serde_json::Value),
    Failed(String),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Done(_) => TaskStatus::Done,
            TaskOutcome::Failed(_) => TaskStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub image_path: String,
    pub task: TaskKind,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub processed_at: Option<i64>,
}
