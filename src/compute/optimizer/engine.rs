//! The generation loop and its phase transitions.

use std::cell::OnceCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::schema::{
    Endpoint, FieldError, GenerationRecord, GenerationReport, HistoryEvent, HistoryLog, Individual,
    LockPolicy, LockSnapshot, OptimizationResult, OptimizerConfig, OptimizerEvent, OptimizerPhase,
    Pose, StopReason,
};

use super::OptimizerError;
use super::convergence::{ConvergenceDetector, ConvergenceVerdict};
use super::events::{Control, EventSink, OptimizerHandle, ParameterSource};
use super::fitness::{FitnessEvaluator, read_power};
use super::high_power::{BestPair, HighPowerKeepMode};
use super::lock::PositionLock;
use super::operators::{BreedingParams, OperatorRng};
use super::population::{PopulationPair, best_index, diversity, mean};

/// Active phase with its payload.
#[derive(Debug, Clone)]
enum PhaseState {
    Searching,
    EnhancedExploration { entry_fitness: f64, round: usize },
    AwaitingLock(PositionLock),
    Locked,
    HighPowerKeep(Box<HighPowerKeepMode>),
}

impl PhaseState {
    fn label(&self) -> OptimizerPhase {
        match self {
            PhaseState::Searching => OptimizerPhase::Searching,
            PhaseState::EnhancedExploration { .. } => OptimizerPhase::EnhancedExploration,
            PhaseState::AwaitingLock(_) => OptimizerPhase::GlobalConvergedAwaitingLock,
            PhaseState::Locked => OptimizerPhase::Locked,
            PhaseState::HighPowerKeep(_) => OptimizerPhase::HighPowerKeep,
        }
    }
}

/// How an evaluation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Complete,
    /// Stopped after the given number of pairs were measured.
    Cancelled(usize),
    /// Locked on the pair at the given index.
    Locked(usize),
}

impl Pass {
    /// Leading slots of the fitness vector that hold real readings.
    fn evaluated(self, population: usize) -> usize {
        match self {
            Pass::Complete => population,
            Pass::Cancelled(count) => count,
            Pass::Locked(index) => index + 1,
        }
    }
}

/// Run state owned by the optimizer.
#[derive(Debug)]
struct OptimizerState {
    phase: PhaseState,
    population: PopulationPair,
    fitness: Vec<f64>,
    detector: ConvergenceDetector,
    best: Option<BestPair>,
    generation: usize,
    evaluations: u64,
    light_detected: bool,
    global_converged: bool,
    lock: OnceCell<LockSnapshot>,
    history: HistoryLog,
}

impl Default for OptimizerState {
    fn default() -> Self {
        Self {
            phase: PhaseState::Searching,
            population: PopulationPair::default(),
            fitness: Vec::new(),
            detector: ConvergenceDetector::new(),
            best: None,
            generation: 0,
            evaluations: 0,
            light_detected: false,
            global_converged: false,
            lock: OnceCell::new(),
            history: HistoryLog::default(),
        }
    }
}

/// Dual-population optimizer driving an injected fitness evaluator.
pub struct Optimizer<E: FitnessEvaluator> {
    config: OptimizerConfig,
    evaluator: E,
    rng: OperatorRng,
    state: OptimizerState,
    events: EventSink,
    cancelled: Arc<AtomicBool>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    parameter_source: Option<Box<dyn ParameterSource + Send>>,
}

impl<E: FitnessEvaluator> Optimizer<E> {
    /// Create a new optimizer.
    pub fn new(config: OptimizerConfig, evaluator: E) -> Self {
        let rng = match config.random_seed {
            Some(seed) => OperatorRng::new(seed),
            None => OperatorRng::random(),
        };
        let (control_tx, control_rx) = mpsc::channel();

        Self {
            config,
            evaluator,
            rng,
            state: OptimizerState::default(),
            events: EventSink::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            control_tx,
            control_rx,
            parameter_source: None,
        }
    }

    /// Poll `source` for parameter updates at every generation boundary.
    pub fn with_parameter_source(mut self, source: impl ParameterSource + Send + 'static) -> Self {
        self.parameter_source = Some(Box::new(source));
        self
    }

    /// Open the event channel. A later call replaces the earlier receiver.
    pub fn subscribe(&mut self) -> Receiver<OptimizerEvent> {
        let (sink, rx) = EventSink::channel();
        self.events = sink;
        rx
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Remote control usable from other threads.
    pub fn handle(&self) -> OptimizerHandle {
        OptimizerHandle::new(Arc::clone(&self.cancelled), self.control_tx.clone())
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.state.phase.label()
    }

    pub fn population(&self) -> &PopulationPair {
        &self.state.population
    }

    pub fn history(&self) -> &HistoryLog {
        &self.state.history
    }

    pub fn lock_snapshot(&self) -> Option<&LockSnapshot> {
        self.state.lock.get()
    }

    /// Best pair measured so far.
    pub fn best(&self) -> Option<&BestPair> {
        self.state.best.as_ref()
    }

    /// Apply a parameter update immediately, outside of a run.
    pub fn apply_update(&mut self, partial: &Map<String, Value>) -> Result<usize, Vec<FieldError>> {
        let outcome = self.config.tunables.apply_fields(partial);
        self.after_update(&outcome.applied);
        if outcome.rejected.is_empty() {
            Ok(outcome.applied.len())
        } else {
            Err(outcome.rejected)
        }
    }

    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn emit(&mut self, event: OptimizerEvent) {
        self.events.emit(event);
    }

    fn log_event(&mut self, event: HistoryEvent) {
        self.state.history.events.push(event);
    }

    // ========================================================================
    // Rates in effect
    // ========================================================================

    fn mutation_rate(&self) -> f64 {
        let tunables = &self.config.tunables;
        match &self.state.phase {
            PhaseState::EnhancedExploration { .. } => tunables.enhanced_mutation_rate,
            PhaseState::HighPowerKeep(mode) => mode.mutation_rate(),
            _ => tunables.gene_mutation_rate,
        }
    }

    fn crossover_rate(&self) -> f64 {
        match &self.state.phase {
            PhaseState::HighPowerKeep(mode) => mode.crossover_rate(),
            _ => self.config.tunables.gene_crossover_rate,
        }
    }

    fn chromosome_crossover_rate(&self) -> f64 {
        match &self.state.phase {
            PhaseState::HighPowerKeep(mode) => mode.settings().chromosome_crossover_rate,
            _ => self.config.tunables.chromosome_crossover_rate,
        }
    }

    fn population_size(&self) -> usize {
        match &self.state.phase {
            PhaseState::HighPowerKeep(mode) => mode.population_size(),
            _ => self.config.tunables.population_size,
        }
    }

    // ========================================================================
    // Phase transitions
    // ========================================================================

    /// Arm the position lock against the best reading so far.
    pub fn arm_position_lock(&mut self) -> Result<(), OptimizerError> {
        match self.state.phase {
            PhaseState::Locked | PhaseState::HighPowerKeep(_) => {
                return Err(OptimizerError::PhaseConflict {
                    action: "arm the position lock",
                    phase: self.phase(),
                });
            }
            PhaseState::AwaitingLock(_) => return Ok(()),
            _ => {}
        }
        let reference = self
            .state
            .best
            .as_ref()
            .map(|best| best.2)
            .ok_or(OptimizerError::NoMeasurement)?;
        self.arm_lock_at(reference);
        Ok(())
    }

    fn arm_lock_at(&mut self, reference: f64) {
        info!("Position lock armed at reference {reference:.6}");
        self.state.phase = PhaseState::AwaitingLock(PositionLock::arm(reference));
        self.log_event(HistoryEvent::LockArmed {
            generation: self.state.generation,
            reference,
        });
        self.emit(OptimizerEvent::LockArmed { reference });
    }

    fn check_center(&self, endpoint: Endpoint, center: &[f64]) -> Result<(), OptimizerError> {
        let expected = self.config.search_space.endpoint(endpoint).dimension();
        if center.len() != expected {
            return Err(OptimizerError::CenterDimension {
                endpoint,
                expected,
                found: center.len(),
            });
        }
        Ok(())
    }

    /// Switch to high-power-keep mode after convergence.
    ///
    /// With at least three `recent` best pairs the center is the fittest of
    /// the last three; pass `history().recent_best_pairs(3)` to center on the
    /// run so far. Every slot of the new population is a perturbed clone.
    pub fn enter_enhanced_high_power_mode(
        &mut self,
        a: Individual,
        b: Individual,
        fitness: f64,
        recent: &[BestPair],
    ) -> Result<(), OptimizerError> {
        self.check_center(Endpoint::A, &a)?;
        self.check_center(Endpoint::B, &b)?;
        let mode = HighPowerKeepMode::new(&self.config.tunables.high_power, a, b, fitness, recent);
        self.install_high_power(mode, false);
        Ok(())
    }

    /// Switch to high-power-keep mode around an arbitrary pose.
    ///
    /// Without a pose the best pair so far is used. Index 0 of the new
    /// population is the unperturbed center.
    pub fn start_high_power_keep(&mut self, center: Option<Pose>) -> Result<(), OptimizerError> {
        let (a, b, fitness) = match center {
            Some(pose) => {
                let space = &self.config.search_space;
                (
                    space.individual_from_pose(Endpoint::A, &pose),
                    space.individual_from_pose(Endpoint::B, &pose),
                    0.0,
                )
            }
            None => self.state.best.clone().ok_or(OptimizerError::NoMeasurement)?,
        };
        let mode = HighPowerKeepMode::new(&self.config.tunables.high_power, a, b, fitness, &[]);
        self.install_high_power(mode, true);
        Ok(())
    }

    fn install_high_power(&mut self, mode: HighPowerKeepMode, explicit: bool) {
        let population = mode.create_initial_population(&self.config.search_space, &mut self.rng, explicit);
        let status = mode.status();
        info!(
            "Entering high-power keep: center fitness {:.6}, population {}, window ±{:.2}%",
            status.center_fitness,
            status.population_size,
            mode.settings().search_range_percent * 50.0,
        );

        self.state.fitness = vec![0.0; population.len()];
        self.state.population = population;
        self.state.phase = PhaseState::HighPowerKeep(Box::new(mode));
        self.log_event(HistoryEvent::HighPowerEntered {
            generation: self.state.generation,
            center_fitness: status.center_fitness,
            explicit,
        });
        self.emit(OptimizerEvent::HighPowerModeEntered { params: status });
    }

    fn declare_global_convergence(&mut self) {
        let best = self.state.best.as_ref().map_or(0.0, |b| b.2);
        info!(
            "Generation {}: global convergence after {} local convergences, best {best:.6}",
            self.state.generation,
            self.state.detector.local_convergence_count()
        );
        self.state.global_converged = true;
        self.log_event(HistoryEvent::GlobalConvergence {
            generation: self.state.generation,
            best_fitness: best,
            local_convergence_count: self.state.detector.local_convergence_count(),
        });
        self.emit(OptimizerEvent::GlobalConvergenceDetected {
            generation: self.state.generation,
            best,
        });
        self.arm_lock_at(best);
    }

    fn observe_convergence(&mut self, generation_best: f64) {
        let exploring_since = match self.state.phase {
            PhaseState::Searching => None,
            PhaseState::EnhancedExploration { entry_fitness, .. } => Some(entry_fitness),
            _ => return,
        };
        let tunables = &self.config.tunables;
        let verdict = self.state.detector.observe(
            generation_best,
            exploring_since,
            tunables.convergence_threshold,
            tunables.enhanced_exploration_max,
        );
        let generation = self.state.generation;

        match verdict {
            ConvergenceVerdict::Continue => {}
            ConvergenceVerdict::EnterExploration { round } => {
                let mutation_rate = self.config.tunables.enhanced_mutation_rate;
                info!(
                    "Generation {generation}: local convergence #{}, enhanced exploration round {round} (mutation {mutation_rate})",
                    self.state.detector.local_convergence_count()
                );
                self.state.phase = PhaseState::EnhancedExploration {
                    entry_fitness: generation_best,
                    round,
                };
                self.log_event(HistoryEvent::ExplorationStarted {
                    generation,
                    round,
                    entry_fitness: generation_best,
                    mutation_rate,
                });
                self.emit(OptimizerEvent::ExplorationStarted { generation, round });
            }
            ConvergenceVerdict::ExplorationImproved { improvement } => {
                info!("Generation {generation}: exploration improved by {:.2}%", improvement * 100.0);
                self.state.phase = PhaseState::Searching;
                self.end_exploration(improvement);
            }
            ConvergenceVerdict::Global => {
                if let Some(entry) = exploring_since {
                    let improvement = if entry > 0.0 { (generation_best - entry) / entry } else { 0.0 };
                    self.end_exploration(improvement);
                }
                self.declare_global_convergence();
            }
        }
    }

    fn end_exploration(&mut self, improvement: f64) {
        let generation = self.state.generation;
        self.log_event(HistoryEvent::ExplorationEnded { generation, improvement });
        self.emit(OptimizerEvent::ExplorationEnded { generation, improvement });
    }

    /// Fire the lock if armed and `fitness` is within tolerance.
    fn try_lock(&mut self, index: usize, fitness: f64) -> bool {
        let PhaseState::AwaitingLock(lock) = self.state.phase else {
            return false;
        };
        let Some(deviation) = lock.check(fitness, self.config.tunables.lock_mode_threshold) else {
            return false;
        };

        let (a, b) = self.state.population.pair(index);
        let pose = self.config.search_space.pose(a, b);
        let snapshot = LockSnapshot {
            a: a.to_vec(),
            b: b.to_vec(),
            pose,
            fitness,
            reference: lock.reference(),
            deviation,
            generation: self.state.generation,
        };
        info!(
            "Position locked at {fitness:.6} ({:.3}% from {:.6})",
            deviation * 100.0,
            lock.reference()
        );
        if self.state.lock.set(snapshot).is_err() {
            warn!("Lock snapshot already captured; keeping the first one");
        }
        self.state.phase = PhaseState::Locked;
        self.log_event(HistoryEvent::PositionLocked {
            generation: self.state.generation,
            fitness,
            deviation,
        });
        self.emit(OptimizerEvent::PositionLocked { pose, fitness });
        true
    }

    // ========================================================================
    // Generation boundary
    // ========================================================================

    /// Consume queued control messages and parameter updates.
    fn handle_boundary(&mut self) {
        let mut parameters: Option<Map<String, Value>> = None;
        let controls: Vec<Control> = self.control_rx.try_iter().collect();

        for control in controls {
            match control {
                Control::Stop => self.cancelled.store(true, Ordering::Relaxed),
                Control::ArmLock => {
                    if let Err(err) = self.arm_position_lock() {
                        warn!("Ignoring lock request: {err}");
                    }
                }
                Control::HighPower { center } => {
                    if let Err(err) = self.start_high_power_keep(center) {
                        warn!("Ignoring high-power request: {err}");
                    }
                }
                Control::Parameters(update) => parameters.get_or_insert_with(Map::new).extend(update),
            }
        }

        if let Some(source) = self.parameter_source.as_mut()
            && let Some(update) = source.request()
        {
            parameters.get_or_insert_with(Map::new).extend(update);
        }

        if let Some(update) = parameters {
            let outcome = self.config.tunables.apply_fields(&update);
            self.after_update(&outcome.applied);
        }
    }

    fn after_update(&mut self, applied: &[String]) {
        if applied.is_empty() {
            return;
        }
        if let PhaseState::HighPowerKeep(mode) = &mut self.state.phase {
            mode.sync_settings(&self.config.tunables.high_power, applied);
        }
        debug!("Applied parameters: {}", applied.join(", "));
        self.log_event(HistoryEvent::ParametersUpdated {
            generation: self.state.generation,
            fields: applied.to_vec(),
        });
        self.emit(OptimizerEvent::ParametersUpdated {
            fields: applied.to_vec(),
            count: applied.len(),
        });
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate pairs in index order. Unevaluated entries stay at zero.
    fn evaluate_population(&mut self) -> Pass {
        self.state.fitness = vec![0.0; self.state.population.len()];

        for i in 0..self.state.population.len() {
            if self.cancelled() {
                return Pass::Cancelled(i);
            }

            let (a, b) = self.state.population.pair(i);
            let pose = self.config.search_space.pose(a, b);
            let power = read_power(&mut self.evaluator, &pose);

            self.state.fitness[i] = power;
            self.state.evaluations += 1;

            if !self.state.light_detected && power >= self.config.tunables.light_threshold {
                self.state.light_detected = true;
                info!("Light detected: {power:.6} at {pose}");
            }

            self.emit(OptimizerEvent::Evaluation {
                count: self.state.evaluations,
                power,
                pose,
                phase: self.phase(),
            });

            if self.try_lock(i, power) {
                return Pass::Locked(i);
            }
        }

        Pass::Complete
    }

    fn update_best(&mut self, index: usize) {
        let fitness = self.state.fitness[index];
        if self.state.best.as_ref().is_none_or(|best| fitness > best.2) {
            let (a, b) = self.state.population.pair(index);
            self.state.best = Some((a.to_vec(), b.to_vec(), fitness));
        }
    }

    fn record_generation(&mut self, index: usize, evaluated: usize) {
        let (a, b) = self.state.population.pair(index);
        let record = GenerationRecord {
            generation: self.state.generation,
            best_fitness: self.state.fitness[index],
            avg_fitness: mean(&self.state.fitness[..evaluated]),
            diversity_a: diversity(&self.state.population.a),
            diversity_b: diversity(&self.state.population.b),
            mutation_rate: self.mutation_rate(),
            phase: self.phase(),
            best_a: a.to_vec(),
            best_b: b.to_vec(),
        };
        debug!(
            "Generation {}: best {:.6}, avg {:.6}, diversity {:.4}/{:.4}, {}",
            record.generation,
            record.best_fitness,
            record.avg_fitness,
            record.diversity_a,
            record.diversity_b,
            record.phase
        );
        self.state.history.records.push(record);
    }

    fn best_pose(&self) -> Pose {
        let space = &self.config.search_space;
        match &self.state.best {
            Some((a, b, _)) => space.pose(a, b),
            None => space.pose(&[], &[]),
        }
    }

    /// Progress of the generation just recorded.
    pub fn report(&self) -> GenerationReport {
        let last = self.state.history.records.last();
        GenerationReport {
            generation: last.map_or(0, |r| r.generation),
            total_generations: self.config.generations,
            best_fitness: last.map_or(0.0, |r| r.best_fitness),
            avg_fitness: last.map_or(0.0, |r| r.avg_fitness),
            best_ever_fitness: self.state.best.as_ref().map_or(0.0, |b| b.2),
            best_pose: self.best_pose(),
            phase: self.phase(),
            mutation_rate: self.mutation_rate(),
            evaluations: self.state.evaluations,
            light_detected: self.state.light_detected,
            global_converged: self.state.global_converged,
            local_convergence_count: self.state.detector.local_convergence_count(),
            high_power: match &self.state.phase {
                PhaseState::HighPowerKeep(mode) => Some(mode.status()),
                _ => None,
            },
        }
    }

    // ========================================================================
    // Breeding
    // ========================================================================

    fn breed(&mut self, best: usize) -> Result<PopulationPair, OptimizerError> {
        let space = &self.config.search_space;

        if let PhaseState::HighPowerKeep(mode) = &mut self.state.phase {
            let (a, b) = self.state.population.pair(best);
            let fitness = self.state.fitness[best];
            let update = mode.update_search_center(a, b, fitness);
            let center_fitness = mode.center_fitness();
            let next = mode.create_new_population(&self.state.population, &self.state.fitness, space, &mut self.rng)?;

            let generation = self.state.generation;
            if update.improved {
                debug!("High-power center moved to {fitness:.6}");
                self.log_event(HistoryEvent::CenterImproved { generation, fitness });
            }
            if let Some(adjustment) = update.adjustment {
                self.log_event(HistoryEvent::RatesAdjusted {
                    generation,
                    mutation_rate: adjustment.mutation_rate,
                    crossover_rate: adjustment.crossover_rate,
                    stable: adjustment.stable,
                });
            }
            if update.drift {
                warn!("Possible drift: {fitness:.6} against center {center_fitness:.6}");
                self.log_event(HistoryEvent::PossibleDrift {
                    generation,
                    fitness,
                    center_fitness,
                });
                self.emit(OptimizerEvent::PossibleDrift { fitness, center_fitness });
            }
            return Ok(next);
        }

        let tunables = &self.config.tunables;
        let params = BreedingParams {
            population_size: self.population_size().max(1),
            elite_size: tunables.elite_size,
            tournament_size: tunables.tournament_size,
            mutation_rate: self.mutation_rate(),
            gene_crossover_rate: self.crossover_rate(),
            chromosome_crossover_rate: self.chromosome_crossover_rate(),
        };
        self.rng.breed(&self.state.population, &self.state.fitness, space, &params)
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    fn initialize(&mut self) -> Result<(), OptimizerError> {
        self.config.validate()?;
        if self.state.population.is_empty() {
            self.state.population =
                PopulationPair::initialize(&self.config.search_space, self.population_size(), &mut self.rng)?;
            self.state.fitness = vec![0.0; self.state.population.len()];
        }
        info!(
            "Optimizing {} A + {} B variables, population {}, up to {} generations",
            self.config.search_space.a.dimension(),
            self.config.search_space.b.dimension(),
            self.state.population.len(),
            self.config.generations
        );
        Ok(())
    }

    /// One generation. Returns a stop reason when the run should end.
    fn step<F>(&mut self, callback: &mut F) -> Result<Option<StopReason>, OptimizerError>
    where
        F: FnMut(&GenerationReport),
    {
        let pass = self.evaluate_population();
        let evaluated = pass.evaluated(self.state.fitness.len());

        if let Pass::Cancelled(_) = pass {
            if let Some(best) = best_index(&self.state.fitness[..evaluated]) {
                self.update_best(best);
            }
            return Ok(Some(StopReason::Cancelled));
        }

        let best = best_index(&self.state.fitness[..evaluated]).ok_or(OptimizerError::EmptyPopulation)?;
        self.update_best(best);

        let mut locked = matches!(pass, Pass::Locked(_));
        if !locked && !self.state.global_converged {
            self.observe_convergence(self.state.fitness[best]);
            // The reference was armed after this generation was measured.
            if self.state.global_converged {
                locked = self.try_lock(best, self.state.fitness[best]);
            }
        }

        if locked {
            self.record_generation(best, evaluated);
            self.finish_generation(callback);
            return match self.config.lock_policy {
                LockPolicy::Stop => Ok(Some(StopReason::Locked)),
                LockPolicy::HoldHighPower => {
                    if let Some(snapshot) = self.state.lock.get() {
                        let mode = HighPowerKeepMode::new(
                            &self.config.tunables.high_power,
                            snapshot.a.clone(),
                            snapshot.b.clone(),
                            snapshot.fitness,
                            &[],
                        );
                        self.install_high_power(mode, true);
                    }
                    Ok(None)
                }
            };
        }

        let next = self.breed(best)?;
        self.record_generation(best, evaluated);
        self.state.population = next;
        self.state.fitness = vec![0.0; self.state.population.len()];
        self.finish_generation(callback);
        Ok(None)
    }

    fn finish_generation<F>(&mut self, callback: &mut F)
    where
        F: FnMut(&GenerationReport),
    {
        let report = self.report();
        callback(&report);
        self.emit(OptimizerEvent::Generation(report));
        self.state.generation += 1;
    }

    fn run_loop<F>(&mut self, callback: &mut F) -> Result<StopReason, OptimizerError>
    where
        F: FnMut(&GenerationReport),
    {
        self.initialize()?;

        while self.state.generation < self.config.generations {
            self.handle_boundary();
            if self.cancelled() {
                return Ok(StopReason::Cancelled);
            }
            if let Some(reason) = self.step(callback)? {
                return Ok(reason);
            }
        }

        Ok(StopReason::MaxGenerations)
    }

    /// Run with a per-generation progress callback.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> OptimizationResult
    where
        F: FnMut(&GenerationReport),
    {
        let start_time = Instant::now();
        let stop_reason = match self.run_loop(&mut callback) {
            Ok(reason) => reason,
            Err(err) => {
                error!("Optimization failed: {err}");
                StopReason::Error(err.to_string())
            }
        };
        let elapsed = start_time.elapsed().as_secs_f64();

        let result = self.result(stop_reason, elapsed);
        info!(
            "Finished after {} generations ({} evaluations, {:.2}s): {:?}, best {:.6}",
            result.generations, result.evaluations, elapsed, result.stop_reason, result.best_fitness
        );
        self.emit(OptimizerEvent::Completed {
            success: result.success,
            best_fitness: result.best_fitness,
            stop_reason: result.stop_reason.clone(),
        });
        result
    }

    /// Run the optimization (blocking).
    pub fn run(&mut self) -> OptimizationResult {
        self.run_with_callback(|_| {})
    }

    fn result(&self, stop_reason: StopReason, elapsed_seconds: f64) -> OptimizationResult {
        let (best_a, best_b, best_fitness) = self
            .state
            .best
            .clone()
            .unwrap_or_else(|| (Vec::new(), Vec::new(), 0.0));
        let error = match &stop_reason {
            StopReason::Error(message) => Some(message.clone()),
            _ => None,
        };
        let high_power = match &self.state.phase {
            PhaseState::HighPowerKeep(mode) => Some(mode.status()),
            _ => None,
        };

        OptimizationResult {
            success: error.is_none(),
            error,
            best_fitness,
            best_pose: self.best_pose(),
            best_a,
            best_b,
            generations: self.state.history.records.len(),
            evaluations: self.state.evaluations,
            elapsed_seconds,
            final_phase: self.phase(),
            stop_reason,
            light_detected: self.state.light_detected,
            global_converged: self.state.global_converged,
            local_convergence_count: self.state.detector.local_convergence_count(),
            position_locked: self.state.lock.get().is_some(),
            high_power_active: high_power.is_some(),
            lock: self.state.lock.get().cloned(),
            high_power,
            final_mutation_rate: self.mutation_rate(),
            final_crossover_rate: self.crossover_rate(),
            history: self.state.history.clone(),
        }
    }
}

impl<E: FitnessEvaluator + Send + 'static> Optimizer<E> {
    /// Run on a dedicated worker thread.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<OptimizationResult>> {
        thread::Builder::new()
            .name("fiber-align-optimizer".into())
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::optimizer::EvalError;
    use crate::schema::{Axis, EndpointSpace, SearchSpace, Tunables};
    use serde_json::json;

    fn small_config(population: usize, generations: usize) -> OptimizerConfig {
        OptimizerConfig {
            search_space: SearchSpace {
                a: EndpointSpace {
                    variables: vec![Axis::X, Axis::Y],
                    ..Default::default()
                },
                b: EndpointSpace {
                    variables: vec![Axis::X],
                    ..Default::default()
                },
            },
            generations,
            tunables: Tunables {
                population_size: population,
                ..Default::default()
            },
            random_seed: Some(42),
            ..Default::default()
        }
    }

    fn parabola(pose: &Pose) -> Result<f64, EvalError> {
        Ok(-(pose.a.x - 15.0).powi(2))
    }

    fn flat(_: &Pose) -> Result<f64, EvalError> {
        Ok(10.0)
    }

    #[test]
    fn test_end_to_end_improves() {
        let config = OptimizerConfig {
            search_space: SearchSpace::default(),
            ..small_config(10, 5)
        };
        let mut optimizer = Optimizer::new(config, parabola);
        optimizer.initialize().unwrap();
        let initial_avg = mean(
            &optimizer
                .population()
                .a
                .iter()
                .map(|ind| (ind[0] - 15.0).abs())
                .collect::<Vec<_>>(),
        );

        let result = optimizer.run();
        assert!(result.success);
        assert_eq!(result.stop_reason, StopReason::MaxGenerations);

        let history = result.history.best_fitness();
        assert_eq!(history.len(), 5);
        assert!(history.windows(2).all(|w| w[1] >= w[0]), "{history:?}");
        assert!((result.best_pose.a.x - 15.0).abs() < initial_avg);
        assert_eq!(result.evaluations, 50);
    }

    #[test]
    fn test_population_size_constant() {
        let mut optimizer = Optimizer::new(small_config(12, 6), parabola);
        let mut evaluations = Vec::new();
        let result = optimizer.run_with_callback(|report| evaluations.push(report.evaluations));

        assert_eq!(result.generations, 6);
        assert_eq!(evaluations, vec![12, 24, 36, 48, 60, 72]);
        assert_eq!(optimizer.population().len(), 12);
        assert_eq!(optimizer.population().b.len(), 12);
    }

    #[test]
    fn test_cancellation() {
        let mut optimizer = Optimizer::new(small_config(10, 100), parabola);
        optimizer.cancel_handle().store(true, Ordering::Relaxed);
        let result = optimizer.run();
        assert!(result.success);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.evaluations, 0);
    }

    #[test]
    fn test_stop_mid_generation_keeps_partial_results() {
        let flag = Arc::new(AtomicBool::new(false));
        let remote = Arc::clone(&flag);
        let mut calls = 0;
        let evaluator = move |pose: &Pose| -> Result<f64, EvalError> {
            calls += 1;
            if calls == 13 {
                remote.store(true, Ordering::Relaxed);
            }
            Ok(pose.a.x)
        };
        let mut optimizer = Optimizer::new(small_config(10, 100), evaluator);
        optimizer.cancelled = flag;

        let result = optimizer.run();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.evaluations, 13);
        assert_eq!(result.generations, 1);
        assert!(result.best_fitness > 0.0);
    }

    #[test]
    fn test_stop_keeps_only_measured_pairs() {
        let readings = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&readings);
        let flag = Arc::new(AtomicBool::new(false));
        let remote = Arc::clone(&flag);
        let evaluator = move |pose: &Pose| -> Result<f64, EvalError> {
            let power = -(pose.a.x - 15.0).powi(2);
            let mut seen = seen.lock().unwrap();
            seen.push(power);
            if seen.len() == 3 {
                remote.store(true, Ordering::Relaxed);
            }
            Ok(power)
        };
        let mut optimizer = Optimizer::new(small_config(10, 100), evaluator);
        optimizer.cancelled = flag;

        let result = optimizer.run();
        let readings = readings.lock().unwrap();
        let measured_best = readings.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.evaluations, 3);
        assert_eq!(result.generations, 0);
        assert!(result.best_fitness < 0.0);
        assert_eq!(result.best_fitness, measured_best);
        assert!((-(result.best_pose.a.x - 15.0).powi(2) - measured_best).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_population_is_rejected_not_allocated() {
        let mut optimizer = Optimizer::new(small_config(10, 2), parabola);
        if let Value::Object(update) = json!({"population_size": 1e19}) {
            assert!(optimizer.apply_update(&update).is_err());
        }
        assert_eq!(optimizer.config().tunables.population_size, 10);

        let result = optimizer.run();
        assert!(result.success);
        assert_eq!(result.evaluations, 20);
    }

    #[test]
    fn test_invalid_config_yields_failure_result() {
        let mut config = small_config(10, 5);
        config.tunables.tournament_size = 50;
        let result = Optimizer::new(config, parabola).run();
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(matches!(result.stop_reason, StopReason::Error(_)));
    }

    #[test]
    fn test_evaluation_faults_read_zero() {
        let evaluator = |_: &Pose| -> Result<f64, EvalError> { Err(EvalError::Hardware("no meter".into())) };
        let result = Optimizer::new(small_config(6, 2), evaluator).run();
        assert!(result.success);
        assert_eq!(result.best_fitness, 0.0);
        assert!(!result.light_detected);
    }

    #[test]
    fn test_flat_readings_converge_and_lock() {
        let mut optimizer = Optimizer::new(small_config(8, 50), flat);
        let events = optimizer.subscribe();
        let result = optimizer.run();

        assert!(result.success);
        assert!(result.light_detected);
        assert!(result.global_converged);
        assert_eq!(result.local_convergence_count, 4);
        assert_eq!(result.stop_reason, StopReason::Locked);
        assert_eq!(result.final_phase, OptimizerPhase::Locked);
        let lock = result.lock.unwrap();
        assert_eq!(lock.fitness, 10.0);
        assert_eq!(lock.deviation, 0.0);

        let events: Vec<_> = events.try_iter().collect();
        let explorations = events
            .iter()
            .filter(|e| matches!(e, OptimizerEvent::ExplorationStarted { .. }))
            .count();
        assert_eq!(explorations, 3);
        assert!(events.iter().any(|e| matches!(e, OptimizerEvent::GlobalConvergenceDetected { .. })));
        assert!(events.iter().any(|e| matches!(e, OptimizerEvent::PositionLocked { .. })));
        assert!(matches!(events.last(), Some(OptimizerEvent::Completed { success: true, .. })));
    }

    #[test]
    fn test_hold_high_power_after_lock() {
        let config = OptimizerConfig {
            lock_policy: LockPolicy::HoldHighPower,
            ..small_config(8, 30)
        };
        let mut optimizer = Optimizer::new(config, flat);
        let result = optimizer.run();

        assert!(result.position_locked);
        assert!(result.high_power_active);
        assert_eq!(result.final_phase, OptimizerPhase::HighPowerKeep);
        assert_eq!(result.stop_reason, StopReason::MaxGenerations);
        assert_eq!(optimizer.population().len(), 20);
        assert!(optimizer.population().within(&optimizer.config().search_space));
    }

    #[test]
    fn test_explicit_high_power_start() {
        let mut optimizer = Optimizer::new(small_config(10, 4), parabola);
        assert!(matches!(
            optimizer.start_high_power_keep(None),
            Err(OptimizerError::NoMeasurement)
        ));

        let mut center = Pose::default();
        center.a.x = 14.0;
        center.a.y = 3.0;
        center.b.x = 20.0;
        optimizer.start_high_power_keep(Some(center)).unwrap();
        assert_eq!(optimizer.phase(), OptimizerPhase::HighPowerKeep);
        assert_eq!(optimizer.population().a[0], vec![14.0, 3.0]);
        assert_eq!(optimizer.population().b[0], vec![20.0]);

        let result = optimizer.run();
        assert!(result.high_power_active);
        let status = result.high_power.unwrap();
        assert_eq!(status.population_size, 20);
        assert!(status.center_fitness <= 0.0);
        // Every candidate stays within the ±2.5% window of x around the start.
        for record in &result.history.records {
            assert!((record.best_a[0] - 14.0).abs() <= 0.75 + 1e-9);
        }
    }

    #[test]
    fn test_automatic_high_power_entry() {
        let mut optimizer = Optimizer::new(small_config(10, 3), parabola);
        optimizer
            .enter_enhanced_high_power_mode(vec![15.0, 15.0], vec![15.0], 1.0, &[])
            .unwrap();
        assert_eq!(optimizer.population().len(), 20);
        assert!(optimizer.population().a.iter().all(|ind| ind != &vec![15.0, 15.0]));

        assert!(matches!(
            optimizer.enter_enhanced_high_power_mode(vec![15.0], vec![15.0], 1.0, &[]),
            Err(OptimizerError::CenterDimension { endpoint: Endpoint::A, .. })
        ));
    }

    #[test]
    fn test_high_power_entry_from_recent_history() {
        let mut optimizer = Optimizer::new(small_config(10, 3), parabola);
        optimizer.run();
        let recent = optimizer.history().recent_best_pairs(3);
        assert_eq!(recent.len(), 3);
        let mut fittest = recent[0].clone();
        for pair in &recent[1..] {
            if pair.2 > fittest.2 {
                fittest = pair.clone();
            }
        }

        optimizer
            .enter_enhanced_high_power_mode(vec![1.0, 1.0], vec![1.0], fittest.2, &recent)
            .unwrap();
        let status = optimizer.report().high_power.unwrap();
        assert_eq!(status.center_a, fittest.0);
        assert_eq!(status.center_b, fittest.1);
    }

    #[test]
    fn test_arm_lock_uses_best_so_far() {
        let mut optimizer = Optimizer::new(small_config(10, 3), flat);
        assert!(matches!(optimizer.arm_position_lock(), Err(OptimizerError::NoMeasurement)));

        optimizer.state.best = Some((vec![1.0, 1.0], vec![1.0], 10.0));
        optimizer.arm_position_lock().unwrap();
        assert_eq!(optimizer.phase(), OptimizerPhase::GlobalConvergedAwaitingLock);

        // Flat readings match the reference on the very first evaluation.
        let result = optimizer.run();
        assert_eq!(result.stop_reason, StopReason::Locked);
        assert_eq!(result.evaluations, 1);
        assert!(!result.global_converged);
    }

    #[test]
    fn test_parameter_updates_at_boundaries() {
        let (tx, rx) = mpsc::channel::<Map<String, Value>>();
        let mut optimizer = Optimizer::new(small_config(10, 3), parabola).with_parameter_source(rx);
        let events = optimizer.subscribe();

        if let Value::Object(update) = json!({"population_size": 16, "gene_mutation_rate": 7}) {
            tx.send(update).unwrap();
        }
        let result = optimizer.run();

        assert_eq!(optimizer.config().tunables.population_size, 16);
        assert_eq!(optimizer.config().tunables.gene_mutation_rate, 0.15);
        // First generation ran at the old size, the rest at the new one.
        assert_eq!(result.evaluations, 10 + 16 + 16);
        assert!(events.try_iter().any(|e| matches!(
            e,
            OptimizerEvent::ParametersUpdated { count: 1, .. }
        )));
    }

    #[test]
    fn test_spawned_run_with_handle() {
        let optimizer = Optimizer::new(small_config(10, 1_000_000), parabola);
        let handle = optimizer.handle();
        let worker = optimizer.spawn().unwrap();
        handle.stop();
        let result = worker.join().unwrap();
        assert!(result.success);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
    }
}
