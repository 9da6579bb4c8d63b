use super::evolution_engine::ProgressCallback;
use crate::engines::metrics::report::GenerationRecord;
use std::sync::mpsc::Sender;

/// Reports progress through the `log` facade.
pub struct LogProgressCallback;

impl ProgressCallback for LogProgressCallback {
    fn on_generation_start(&mut self, generation: usize) {
        log::debug!("Generation {} starting...", generation);
    }

    fn on_generation_complete(&mut self, record: &GenerationRecord, best_fitness: f64) {
        log::debug!(
            "Generation {} complete. Best fitness: {:.2}, code coverage: {:.2}%",
            record.generation,
            best_fitness,
            record.code_coverage
        );
    }

    fn on_population_reset(&mut self, generation: usize) {
        log::info!("Coverage stalled, population reset at generation {}", generation);
    }
}

// For driving a front end from another thread
pub struct ChannelProgressCallback {
    sender: Sender<ProgressMessage>,
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    GenerationStart(usize),
    GenerationComplete { record: GenerationRecord, best_fitness: f64 },
    PopulationReset(usize),
}

impl ChannelProgressCallback {
    pub fn new(sender: Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

impl ProgressCallback for ChannelProgressCallback {
    fn on_generation_start(&mut self, generation: usize) {
        let _ = self.sender.send(ProgressMessage::GenerationStart(generation));
    }

    fn on_generation_complete(&mut self, record: &GenerationRecord, best_fitness: f64) {
        let _ = self.sender.send(ProgressMessage::GenerationComplete {
            record: record.clone(),
            best_fitness,
        });
    }

    fn on_population_reset(&mut self, generation: usize) {
        let _ = self.sender.send(ProgressMessage::PopulationReset(generation));
    }
}
