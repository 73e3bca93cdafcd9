#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStage {
    GeneratingMesh,
    BuildingSystem,
    RunningCommand,
    Solving,
    Refining,
    Completed,
}

#[derive(Debug, Clone)]
pub struct RunProgressEvent {
    pub stage: RunStage,
    pub elapsed_wall_s: f64,
    /// Deck key of the running command.
    pub key: Option<String>,
    pub message: Option<String>,
}

impl RunProgressEvent {
    pub fn stage(stage: RunStage, elapsed_wall_s: f64, key: Option<String>, message: Option<String>) -> Self {
        Self {
            stage,
            elapsed_wall_s,
            key,
            message,
        }
    }
}
