//! The `GB` host: every [`HostFn`] resolved against the run context.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::context::RunContext;
use super::engine::{EngineConfig, Shared};
use super::events::{
    ConfirmationRequest, ConfirmationResponder, EventSink, LogEntry, LogKind, ModelCheckpoint,
    PlotEvent, PlotKind, PlotSeries,
};
use super::fs::{self, FileSource};
use crate::error::TensorError;
use crate::gpu;
use crate::hive::{epoch_ms, Network, NetworkConfig};
use crate::layer::DenseLayer;
use crate::prng::Prng;
use crate::script::value::format_number;
use crate::script::{Host, HostFn, Interrupt, Object, Value};
use crate::storage;
use crate::tasks::{self, TASK_TARGETS};
use crate::tensor::TensorInit;

pub(crate) struct GbHost<'a> {
    ctx: &'a mut RunContext,
    sink: &'a mut (dyn EventSink + Send),
    shared: &'a Shared,
    config: &'a EngineConfig,
    files: Option<&'a (dyn FileSource + Send + Sync)>,
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn network(v: &Value) -> Option<Rc<RefCell<Network>>> {
    match v {
        Value::Network(n) => Some(n.clone()),
        _ => None,
    }
}

/// `value || default` for a positive size.
fn size_or(v: Value, default: usize) -> usize {
    let n = v.to_number();
    if v.truthy() && n.is_finite() && n >= 1.0 {
        n as usize
    } else {
        default
    }
}

/// `config.difficulty || 0`.
fn difficulty(v: &Value) -> f64 {
    let d = v.field("difficulty");
    if d.truthy() {
        d.to_number()
    } else {
        0.0
    }
}

fn network_config(cfg: &Value) -> NetworkConfig {
    let defaults = NetworkConfig::default();
    let capacity = cfg.field("capacity");
    let plasticity = cfg.field("plasticity");
    NetworkConfig {
        input_size: size_or(cfg.field("in"), defaults.input_size),
        output_size: size_or(cfg.field("out"), defaults.output_size),
        hidden_size: size_or(cfg.field("hidden"), defaults.hidden_size),
        capacity: if capacity.truthy() {
            capacity.to_number()
        } else {
            defaults.capacity
        },
        plasticity: if plasticity.truthy() {
            plasticity.to_number() as f32
        } else {
            defaults.plasticity
        },
    }
}

/// Script shapes are arrays of positive integers; a bare number is 1-D.
fn shape_arg(v: &Value) -> Result<Vec<usize>, TensorError> {
    let dims: Vec<f64> = match v {
        Value::Array(items) => items.borrow().iter().map(Value::to_number).collect(),
        Value::Floats(buf) => buf.to_vec().into_iter().map(f64::from).collect(),
        Value::Number(n) => vec![*n],
        _ => Vec::new(),
    };
    let valid = !dims.is_empty() && dims.iter().all(|d| d.is_finite() && *d >= 1.0 && d.fract() == 0.0);
    if !valid {
        return Err(TensorError::InvalidShape {
            dims: dims
                .iter()
                .map(|d| if d.is_finite() { *d as i64 } else { 0 })
                .collect(),
        });
    }
    Ok(dims.into_iter().map(|d| d as usize).collect())
}

fn numbers(v: &Value) -> Vec<f64> {
    match v {
        Value::Array(items) => items.borrow().iter().map(Value::to_number).collect(),
        Value::Floats(buf) => buf.to_vec().into_iter().map(f64::from).collect(),
        _ => Vec::new(),
    }
}

/// Copy of a plain object, or a fresh one.
fn copy_object(v: &Value) -> Object {
    match v {
        Value::Object(o) => o.borrow().clone(),
        _ => Object::new(),
    }
}

/// First run of digits and dots, read the way `parseFloat` would.
fn first_number(s: &str) -> Option<f64> {
    let start = s.find(|c: char| c.is_ascii_digit() || c == '.')?;
    let run: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut end = run.len();
    while end > 0 {
        if let Ok(v) = run[..end].parse::<f64>() {
            return Some(v);
        }
        end -= 1;
    }
    None
}

impl<'a> GbHost<'a> {
    pub(crate) fn new(
        ctx: &'a mut RunContext,
        sink: &'a mut (dyn EventSink + Send),
        shared: &'a Shared,
        config: &'a EngineConfig,
        files: Option<&'a (dyn FileSource + Send + Sync)>,
    ) -> Self {
        Self {
            ctx,
            sink,
            shared,
            config,
            files,
        }
    }

    pub(crate) fn emit(&mut self, kind: LogKind, message: impl Into<String>) {
        let id = self.ctx.next_log_id();
        self.sink.on_log(LogEntry::new(id, kind, message));
    }

    fn new_network(&mut self, name: &str, cfg: &NetworkConfig) -> Result<Network, Interrupt> {
        Ok(Network::new(name, cfg, self.ctx.rng.split())?)
    }

    fn generate(&mut self, difficulty: f64) -> tasks::Example {
        tasks::generate(difficulty, &mut self.ctx.rng)
    }

    fn file_nodes(&self) -> Vec<fs::FileNode> {
        self.files.map(|f| f.snapshot()).unwrap_or_default()
    }

    fn dispatch(&mut self, func: HostFn, args: &[Value]) -> Result<Value, Interrupt> {
        use HostFn::*;
        let a0 = arg(args, 0);
        Ok(match func {
            Tensor | Zeros | Rand => {
                let shape = shape_arg(&a0)?;
                let init = match func {
                    Zeros => TensorInit::Zeros,
                    Rand => TensorInit::Random,
                    _ => match arg(args, 1) {
                        Value::Str(mode) => TensorInit::from_name(&mode).unwrap_or(TensorInit::Zeros),
                        _ => TensorInit::Zeros,
                    },
                };
                Value::from(crate::tensor::Tensor::new(&shape, init, &mut self.ctx.rng)?)
            }
            Train | Evaluate => Value::Undefined,
            SaveModel => self.save_model(&a0, &arg(args, 1).to_display())?,
            LoadModel => {
                let path = a0.to_display();
                match self.ctx.checkpoint(&path) {
                    Some(image) => {
                        let net = storage::network_from_bytes(image)
                            .map_err(|e| Interrupt::error(format!("Failed to load model: {e}")))?;
                        Value::from(net)
                    }
                    None => Value::Null,
                }
            }

            ModulesLinear => {
                let in_size = size_or(a0.field("in"), 64);
                let out_size = size_or(a0.field("out"), 64);
                Value::from(DenseLayer::new(in_size, out_size, TensorInit::Random, &mut self.ctx.rng)?)
            }
            ModulesMlp | ModulesTransformer | ModulesCnn | ModulesWorldModel | ModelsWorldModel => {
                Value::from(self.new_network(func.name(), &network_config(&a0))?)
            }

            WorldCreateEnvironment => copy_object(&a0).with("step", Value::Number(0.0)).into(),
            WorldGenerateData => {
                let ex = self.generate(a0.to_number());
                Object::new()
                    .with("input", Value::floats(ex.input))
                    .with("target", Value::floats(ex.target))
                    .into()
            }
            WorldObserve => {
                let d = difficulty(&arg(args, 1));
                Value::floats(self.generate(d).input)
            }
            WorldAct => Object::new()
                .with("reward", Value::Number(0.0))
                .with("done", Value::Bool(false))
                .into(),

            GoalsSetGoal => {
                if let Some(net) = network(&a0) {
                    net.borrow_mut().current_goal = Some(arg(args, 1).to_json());
                }
                Value::Undefined
            }
            GoalsReward => {
                if let Some(net) = network(&a0) {
                    let v = arg(args, 1).to_number() as f32;
                    let mut net = net.borrow_mut();
                    net.satisfaction = net.satisfaction * 0.95 + v * 0.05;
                }
                Value::Undefined
            }
            GoalsGenerateSubgoals => Value::array(vec![Value::from("solve_task")]),
            GoalsSelfEvaluate => match network(&a0) {
                Some(net) => Value::from(net.borrow().satisfaction),
                None => Value::Undefined,
            },

            MemoryLongTermStore => {
                if let Some(net) = network(&a0) {
                    let key = arg(args, 1).to_display();
                    net.borrow_mut().remember(&key, arg(args, 2).to_json());
                }
                Value::Undefined
            }
            MemoryRetrieve => match network(&a0) {
                Some(net) => {
                    let key = arg(args, 1).to_display();
                    net.borrow()
                        .recall(&key)
                        .map(Value::from_json)
                        .unwrap_or(Value::Null)
                }
                None => Value::Null,
            },
            MemoryForget => match network(&a0) {
                Some(net) => {
                    let mut net = net.borrow_mut();
                    if matches!(arg(args, 1), Value::Str(ref s) if &**s == "prune") {
                        Value::from(net.prune_weights(0.1))
                    } else {
                        net.forget_all();
                        Value::Undefined
                    }
                }
                None => Value::Undefined,
            },

            CodeSelfEdit => {
                let target = a0.to_display();
                let replacement = arg(args, 1).to_display();
                Value::Bool(self.self_edit(&target, &replacement))
            }
            CodeRollback => {
                if self.ctx.code.rollback() {
                    self.sink.on_code_update(self.ctx.code.text());
                    self.emit(LogKind::System, "[Rollback] Reverted code.");
                    Value::Bool(true)
                } else {
                    Value::Bool(false)
                }
            }

            AgentsCommunicate => Value::Undefined,
            AgentsNegotiate => Value::Bool(true),

            MetaOptimizeObjective => {
                if let Some(net) = network(&a0) {
                    let mut net = net.borrow_mut();
                    let target = (1.0 - net.satisfaction).max(0.1);
                    net.plasticity = net.plasticity * 0.9 + target * 0.1;
                }
                Value::Undefined
            }

            GraphCreateNode => {
                self.ctx.graph.add_node(&a0.to_display(), arg(args, 1).to_json());
                Value::Undefined
            }
            GraphLink => {
                let weight = match arg(args, 3) {
                    Value::Undefined => 1.0,
                    w => w.to_number(),
                };
                self.ctx.graph.add_edge(
                    &a0.to_display(),
                    &arg(args, 1).to_display(),
                    &arg(args, 2).to_display(),
                    weight,
                );
                Value::Undefined
            }
            GraphQuery => {
                let relation = arg(args, 1).to_display();
                let targets = self.ctx.graph.query(&a0.to_display(), &relation);
                Value::array(targets.into_iter().map(Value::from).collect())
            }
            GraphFindPath => Value::array(Vec::new()),

            EvoCreatePopulation => {
                let n = a0.to_number();
                let n = if n.is_finite() && n > 0.0 { n as usize } else { 0 };
                if n > MAX_POPULATION {
                    return Err(Interrupt::error(format!(
                        "Population size {n} exceeds the limit of {MAX_POPULATION}"
                    )));
                }
                let cfg = network_config(&arg(args, 1));
                let seeds: Vec<Prng> = (0..n).map(|_| self.ctx.rng.split()).collect();
                let agents = build_population(&cfg, seeds)?;
                Value::array(agents.into_iter().map(Value::from).collect())
            }
            EvoMutate => {
                if let Some(net) = network(&a0) {
                    net.borrow_mut().mutate_all(arg(args, 1).to_number() as f32);
                }
                Value::Undefined
            }
            EvoCrossover => {
                let cfg = NetworkConfig {
                    input_size: 10,
                    output_size: 4,
                    ..NetworkConfig::default()
                };
                Value::from(self.new_network("Offspring", &cfg)?)
            }
            EvoSpeciate => Value::array(vec![a0]),

            RlComputeAdvantage => {
                let values = numbers(&arg(args, 1));
                let adv = numbers(&a0)
                    .into_iter()
                    .enumerate()
                    .map(|(i, r)| Value::Number(r - values.get(i).copied().unwrap_or(f64::NAN)))
                    .collect();
                Value::array(adv)
            }
            RlSampleAction => {
                let r = self.ctx.rng.next_f64_01();
                let mut sum = 0.0;
                let picked = numbers(&a0).into_iter().position(|p| {
                    sum += p;
                    r <= sum
                });
                Value::from(picked.unwrap_or(0))
            }
            RlUpdatePolicy => Value::Undefined,

            QuantQuantize => {
                let bits = arg(args, 1).to_display();
                self.emit(LogKind::Info, format!("[Quant] Compressed model to {bits}-bit precision."));
                Value::Undefined
            }
            QuantDistill => {
                if let (Some(source), Some(student)) = (network(&a0), network(&arg(args, 1))) {
                    let (p, s) = {
                        let t = source.borrow();
                        (t.plasticity, t.satisfaction)
                    };
                    let mut student = student.borrow_mut();
                    student.plasticity = (p * 0.8).max(0.1);
                    student.satisfaction = s;
                }
                Value::Undefined
            }

            SystemAllocateThreads => Value::Undefined,
            SystemClearVram => {
                self.emit(LogKind::System, "VRAM Garbage Collection Triggered.");
                Value::Undefined
            }
            SystemOverclock => {
                if let Some(net) = network(&a0) {
                    let name = {
                        let mut net = net.borrow_mut();
                        net.plasticity = 1.0;
                        net.name().to_string()
                    };
                    self.emit(LogKind::Error, format!("[WARN] Overclocking {name}."));
                }
                Value::Undefined
            }

            GpuInit => match gpu::probe() {
                Some(info) => {
                    debug!(adapter = %info.adapter, backend = %info.backend, "gpu adapter acquired");
                    self.ctx.gpu = Some(info);
                    self.emit(LogKind::Success, "[WebGPU] Enabled.");
                    Value::Bool(true)
                }
                None => {
                    self.emit(LogKind::Error, "[WebGPU] Not supported.");
                    Value::Bool(false)
                }
            },
            GpuDispatch => {
                if self.ctx.gpu.is_none() {
                    return Err(Interrupt::error("GPU not initialized."));
                }
                Value::Bool(true)
            }

            FsList => {
                let nodes = self.file_nodes();
                Value::array(fs::list(&nodes, &a0.to_display()).into_iter().map(Value::from).collect())
            }
            FsRead => {
                let nodes = self.file_nodes();
                fs::read(&nodes, &a0.to_display()).map(Value::from).unwrap_or(Value::Null)
            }
            FsExists => Value::Bool(fs::exists(&self.file_nodes(), &a0.to_display())),
            FsIsDirectory => Value::Bool(fs::is_directory(&self.file_nodes(), &a0.to_display())),

            HiveMind => {
                let name = a0.to_display();
                let net = self.new_network(&name, &network_config(&arg(args, 1)))?;
                let net = Rc::new(RefCell::new(net));
                self.ctx.register(&name, net.clone());
                debug!(run_id = self.ctx.run_id, %name, "network registered");
                Value::Network(net)
            }
            HiveAutoExpandIfReady => match network(&a0) {
                Some(net) => Value::Bool(net.borrow_mut().auto_expand_if_ready(epoch_ms())?),
                None => Value::Bool(false),
            },
            HiveTrainTask => match network(&a0) {
                Some(net) => self.train_task(&net, &arg(args, 1))?,
                None => Value::Null,
            },
            HiveScanLocalAgents => Value::array(
                ["agi.gb", "llm.gb", "optimization.gb"]
                    .into_iter()
                    .map(Value::from)
                    .collect(),
            ),
            HiveSuperCluster => Object::new()
                .with("name", Value::from("SuperCluster"))
                .with("agents", a0)
                .into(),
            HiveOptimizeSwarm => Value::Number(0.5 + 0.5 * self.ctx.rng.next_f64_01()),
            HiveIsAlreadyRunning => Value::Bool(false),

            AchaCreateCoder => copy_object(&a0).with("memory", Value::array(Vec::new())).into(),
            AchaArchive => {
                if let Value::Object(coder) = &a0 {
                    let entry: Value = Object::new()
                        .with("label", arg(args, 2))
                        .with("data", arg(args, 1))
                        .into();
                    let memory = coder.borrow().get("memory").cloned();
                    match memory {
                        Some(Value::Array(items)) => items.borrow_mut().push(entry),
                        _ => coder.borrow_mut().set("memory", Value::array(vec![entry])),
                    }
                }
                Value::Undefined
            }
            AchaSpar => self.spar(&arg(args, 1))?,

            UtilsLog => {
                self.emit(LogKind::Info, a0.to_display());
                Value::Undefined
            }
            UtilsSleep => {
                self.sleep(a0.to_number());
                Value::Undefined
            }
            UtilsTimer => Value::Number(epoch_ms() as f64),

            VisualPlot => {
                let plot = plot_event(&a0);
                self.sink.on_plot(plot);
                Value::Undefined
            }
            VisualHeatmap | VisualPlotWeights => Value::Undefined,

            ControlGetSignal => match self.shared.pop_signal() {
                Some(sig) => Value::from(sig.as_str()),
                None => Value::Null,
            },
            ControlRequestConfirmation => self.request_confirmation(a0.to_display())?,

            RandomNormal => {
                let mean = match a0 {
                    Value::Undefined => 0.0,
                    v => v.to_number(),
                };
                let std = match arg(args, 1) {
                    Value::Undefined => 1.0,
                    v => v.to_number(),
                };
                Value::Number(self.ctx.rng.normal(mean, std))
            }
            RandomPerturb | RandomSample => Value::Undefined,
            AutoDiffGrad => Value::Number(0.01),
        })
    }

    fn save_model(&mut self, model: &Value, path: &str) -> Result<Value, Interrupt> {
        let name = match model {
            Value::Network(net) => {
                let net = net.borrow();
                let image = storage::network_to_bytes(&net)
                    .map_err(|e| Interrupt::error(format!("Failed to save model: {e}")))?;
                self.ctx.store_checkpoint(path, image.clone());
                self.sink.on_checkpoint(ModelCheckpoint {
                    run_id: self.ctx.run_id,
                    model: net.name().to_string(),
                    path: path.to_string(),
                    image,
                });
                net.name().to_string()
            }
            _ => "Unknown".to_string(),
        };
        self.emit(LogKind::Success, format!("Model {name} saved to {path}"));
        Ok(Value::Undefined)
    }

    fn self_edit(&mut self, target: &str, replacement: &str) -> bool {
        if !self.ctx.code.self_edit(target, replacement) {
            self.emit(
                LogKind::Error,
                format!("[SelfEdit] Failed: Target '{target}' not found."),
            );
            return false;
        }
        self.emit(
            LogKind::System,
            format!("[SelfEdit] Code Modified: '{target}' -> '{replacement}'"),
        );
        self.sink.on_code_update(self.ctx.code.text());

        if target.contains("plasticity") && replacement.contains("plasticity") {
            if let Some(p) = first_number(replacement) {
                let models: Vec<_> = self.ctx.models().cloned().collect();
                for model in models {
                    model.borrow_mut().plasticity = p as f32;
                    self.emit(
                        LogKind::Info,
                        format!("[HotReload] Updated runtime plasticity to {}", format_number(p)),
                    );
                }
            }
        }
        true
    }

    fn train_task(&mut self, net: &Rc<RefCell<Network>>, task: &Value) -> Result<Value, Interrupt> {
        let (inputs, outputs) = {
            let net = net.borrow();
            (net.input_size(), net.output_size())
        };
        let d = task.field("difficulty");
        let given_input = task.field("input").field("data");
        let (input, target) = if !given_input.is_nullish() {
            let input = given_input.to_f32_vec().unwrap_or_default();
            let t = task.field("target");
            let target = if t.truthy() {
                let data = t.field("data");
                let source = if data.truthy() { data } else { t };
                source.to_f32_vec().unwrap_or_default()
            } else if !matches!(d, Value::Undefined) {
                self.generate(d.to_number()).target
            } else {
                vec![0.0; TASK_TARGETS]
            };
            (input, target)
        } else {
            let ex = self.generate(difficulty(task)).fitted(inputs, outputs);
            (ex.input, ex.target)
        };

        let step = {
            let mut net = net.borrow_mut();
            let lr = net.mutation_intensity();
            trace!(lr, "train step");
            net.train_step(&input, &target, lr)?
        };
        let insight = self.generate(difficulty(task)).input;
        Ok(Object::new()
            .with("loss", Value::from(step.loss))
            .with("accuracy", Value::from(step.accuracy))
            .with("insight_vector", Value::floats(insight))
            .into())
    }

    fn spar(&mut self, model: &Value) -> Result<Value, Interrupt> {
        let ex = self.generate(0.0);
        let (pred, target) = match model {
            Value::Network(net) => {
                let net = net.borrow();
                let ex = ex.fitted(net.input_size(), net.output_size());
                let pred = net.forward(&ex.input)?;
                (pred, ex.target)
            }
            Value::Layer(layer) => {
                let layer = layer.borrow();
                let ex = ex.fitted(layer.in_size(), layer.out_size());
                let pred = layer.forward(&ex.input)?;
                (pred, ex.target)
            }
            _ => return Err(Interrupt::error("model.forward is not a function")),
        };
        let error: f32 = pred
            .iter()
            .zip(target.iter())
            .map(|(p, t)| (p - t) * (p - t))
            .sum();
        let retention = (1.0 - error * 0.5).max(0.0);
        Ok(Object::new()
            .with("win_rate", Value::Number(if retention > 0.8 { 1.0 } else { 0.0 }))
            .with("retention", Value::from(retention))
            .into())
    }

    /// Sleep in slices, returning early once a stop is requested.
    fn sleep(&mut self, ms: f64) {
        if !ms.is_finite() || ms <= 0.0 {
            thread::yield_now();
            return;
        }
        let deadline = Instant::now() + Duration::from_secs_f64(ms / 1000.0);
        let slice = self.config.sleep_slice.max(Duration::from_millis(1));
        while self.shared.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    fn request_confirmation(&mut self, message: String) -> Result<Value, Interrupt> {
        let id = self.ctx.next_confirmation_id();
        let (tx, rx) = mpsc::sync_channel(1);
        debug!(run_id = self.ctx.run_id, id, "awaiting confirmation");
        self.sink.on_confirmation(ConfirmationRequest {
            run_id: self.ctx.run_id,
            id,
            message,
            responder: ConfirmationResponder::new(id, tx),
        });
        let poll = self.config.confirmation_poll.max(Duration::from_millis(1));
        loop {
            match rx.recv_timeout(poll) {
                Ok(approved) => return Ok(Value::Bool(approved)),
                Err(RecvTimeoutError::Timeout) => {
                    if !self.shared.is_running() {
                        return Err(Interrupt::Stopped);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(Value::Bool(false)),
            }
        }
    }
}

const MAX_POPULATION: usize = 10_000;

#[cfg(feature = "parallel")]
fn build_population(cfg: &NetworkConfig, seeds: Vec<Prng>) -> Result<Vec<Network>, TensorError> {
    use rayon::prelude::*;
    seeds
        .into_par_iter()
        .enumerate()
        .map(|(i, rng)| Network::new(format!("Agent_{i}"), cfg, rng))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn build_population(cfg: &NetworkConfig, seeds: Vec<Prng>) -> Result<Vec<Network>, TensorError> {
    seeds
        .into_iter()
        .enumerate()
        .map(|(i, rng)| Network::new(format!("Agent_{i}"), cfg, rng))
        .collect()
}

fn plot_event(cfg: &Value) -> PlotEvent {
    let text = |key: &str| match cfg.field(key) {
        Value::Undefined | Value::Null => None,
        v => Some(v.to_display()),
    };
    let title = text("title").unwrap_or_default();
    let kind = text("type")
        .and_then(|k| PlotKind::from_name(&k))
        .unwrap_or_default();
    let series: Vec<PlotSeries> =
        serde_json::from_value(cfg.field("series").to_json()).unwrap_or_default();
    let data = match cfg.field("data").to_json() {
        serde_json::Value::Array(records) => records,
        _ => Vec::new(),
    };
    PlotEvent {
        id: title.clone(),
        title,
        x_axis_key: text("xAxisKey").unwrap_or_default(),
        y_axis_label: text("yAxisLabel"),
        kind,
        series,
        data,
    }
}

impl Host for GbHost<'_> {
    fn call(&mut self, func: HostFn, args: &[Value]) -> Result<Value, Interrupt> {
        trace!(func = func.path(), argc = args.len(), "host call");
        self.dispatch(func, args)
    }

    fn checkpoint(&mut self) -> Result<(), Interrupt> {
        if self.config.loop_yield.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.config.loop_yield);
        }
        if self.shared.is_running() {
            Ok(())
        } else {
            Err(Interrupt::Stopped)
        }
    }

    fn random(&mut self) -> f64 {
        self.ctx.rng.next_f64_01()
    }

    fn log(&mut self, message: &str) {
        self.emit(LogKind::Info, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::TRAIN_INTENSITY_SCALE;

    #[derive(Default)]
    struct Sink {
        logs: Vec<LogEntry>,
        plots: Vec<PlotEvent>,
    }

    impl EventSink for Sink {
        fn on_log(&mut self, entry: LogEntry) {
            self.logs.push(entry);
        }
        fn on_plot(&mut self, plot: PlotEvent) {
            self.plots.push(plot);
        }
        fn on_confirmation(&mut self, request: ConfirmationRequest) {
            let _ = request.responder.answer(true);
        }
    }

    struct Fixture {
        ctx: RunContext,
        sink: Sink,
        shared: Shared,
        config: EngineConfig,
    }

    impl Fixture {
        fn new(source: &str) -> Self {
            let shared = Shared::new();
            shared.start();
            Self {
                ctx: RunContext::new(1, source, Prng::new(42)),
                sink: Sink::default(),
                shared,
                config: EngineConfig::default().with_loop_yield(Duration::ZERO),
            }
        }

        fn call(&mut self, func: HostFn, args: &[Value]) -> Result<Value, Interrupt> {
            let mut host = GbHost::new(&mut self.ctx, &mut self.sink, &self.shared, &self.config, None);
            host.call(func, args)
        }

        fn messages(&self) -> Vec<&str> {
            self.sink.logs.iter().map(|l| l.message.as_str()).collect()
        }
    }

    fn cfg(pairs: &[(&str, f64)]) -> Value {
        let mut o = Object::new();
        for (k, v) in pairs {
            o.set(*k, Value::Number(*v));
        }
        o.into()
    }

    #[test]
    fn hot_reload_changes_the_next_train_intensity() {
        let mut fx = Fixture::new("const cfg = { plasticity: 0.5 };");
        let mind = fx
            .call(HostFn::HiveMind, &[Value::from("Core"), cfg(&[("plasticity", 0.5)])])
            .unwrap();
        let edited = fx
            .call(
                HostFn::CodeSelfEdit,
                &[Value::from("plasticity: 0.5"), Value::from("plasticity: 0.95")],
            )
            .unwrap();
        assert!(edited.truthy());
        let net = network(&mind).unwrap();
        let expected = 0.95f32 * TRAIN_INTENSITY_SCALE;
        assert!((net.borrow().mutation_intensity() - expected).abs() < 1e-6);
        assert_eq!(fx.messages()[1], "[HotReload] Updated runtime plasticity to 0.95");
    }

    #[test]
    fn train_task_reports_bounded_metrics() {
        let mut fx = Fixture::new("");
        let mind = fx.call(HostFn::HiveMind, &[Value::from("T"), Value::Undefined]).unwrap();
        let task = cfg(&[("difficulty", 1.0)]);
        for _ in 0..20 {
            let r = fx.call(HostFn::HiveTrainTask, &[mind.clone(), task.clone()]).unwrap();
            let acc = r.field("accuracy").to_number();
            assert!((0.0..=1.0).contains(&acc));
            assert!(r.field("loss").to_number().is_finite());
            assert_eq!(r.field("insight_vector").to_f32_vec().unwrap().len(), 10);
        }
        let not_a_network = fx.call(HostFn::HiveTrainTask, &[Value::Null, task]).unwrap();
        assert!(matches!(not_a_network, Value::Null));
    }

    #[test]
    fn train_task_uses_given_input_and_target() {
        let mut fx = Fixture::new("");
        let mind = fx
            .call(HostFn::HiveMind, &[Value::from("T"), cfg(&[("in", 2.0), ("out", 1.0)])])
            .unwrap();
        let input = Object::new().with("data", Value::array(vec![Value::Number(1.0), Value::Number(-1.0)]));
        let task: Value = Object::new()
            .with("input", input.into())
            .with("target", Value::array(vec![Value::Number(0.5)]))
            .into();
        let r = fx.call(HostFn::HiveTrainTask, &[mind, task]).unwrap();
        assert!(r.field("loss").to_number() <= 2.25);
        // Wrong-size input is a dimension error.
        let bad: Value = Object::new()
            .with("input", Object::new().with("data", Value::array(vec![Value::Number(1.0)])).into())
            .into();
        let mind = fx.call(HostFn::HiveMind, &[Value::from("U"), cfg(&[("in", 2.0)])]).unwrap();
        let err = fx.call(HostFn::HiveTrainTask, &[mind, bad]).unwrap_err();
        assert!(err.to_string().starts_with("Dimension mismatch"));
    }

    #[test]
    fn goals_and_meta_update_scalars() {
        let mut fx = Fixture::new("");
        let mind = fx.call(HostFn::HiveMind, &[Value::from("G"), Value::Undefined]).unwrap();
        fx.call(HostFn::GoalsReward, &[mind.clone(), Value::Number(1.0)]).unwrap();
        let s = fx.call(HostFn::GoalsSelfEvaluate, &[mind.clone()]).unwrap().to_number();
        assert!((s - 0.525).abs() < 1e-6);
        fx.call(HostFn::MetaOptimizeObjective, &[mind.clone()]).unwrap();
        let p = network(&mind).unwrap().borrow().plasticity;
        assert!((p - (0.5 * 0.9 + 0.475 * 0.1)).abs() < 1e-5);
        // Non-networks are ignored.
        assert!(matches!(
            fx.call(HostFn::GoalsReward, &[Value::Number(1.0), Value::Number(1.0)]),
            Ok(Value::Undefined)
        ));
    }

    #[test]
    fn memory_store_retrieve_forget() {
        let mut fx = Fixture::new("");
        let mind = fx.call(HostFn::HiveMind, &[Value::from("M"), Value::Undefined]).unwrap();
        fx.call(HostFn::MemoryLongTermStore, &[mind.clone(), Value::from("k"), Value::Number(3.0)])
            .unwrap();
        let v = fx.call(HostFn::MemoryRetrieve, &[mind.clone(), Value::from("k")]).unwrap();
        assert_eq!(v.to_number(), 3.0);
        let miss = fx.call(HostFn::MemoryRetrieve, &[mind.clone(), Value::from("x")]).unwrap();
        assert!(matches!(miss, Value::Null));
        let pruned = fx.call(HostFn::MemoryForget, &[mind.clone(), Value::from("prune")]).unwrap();
        assert!(matches!(pruned, Value::Number(_)));
        fx.call(HostFn::MemoryForget, &[mind.clone(), Value::from("all")]).unwrap();
        assert_eq!(network(&mind).unwrap().borrow().memory_len(), 0);
    }

    #[test]
    fn population_and_evolution_stubs() {
        let mut fx = Fixture::new("");
        let pop = fx
            .call(HostFn::EvoCreatePopulation, &[Value::Number(3.0), cfg(&[("in", 4.0)])])
            .unwrap();
        let agents = match &pop {
            Value::Array(items) => items.borrow().clone(),
            _ => panic!("expected array"),
        };
        assert_eq!(agents.len(), 3);
        let names: Vec<String> = agents
            .iter()
            .map(|a| network(a).unwrap().borrow().name().to_string())
            .collect();
        assert_eq!(names, ["Agent_0", "Agent_1", "Agent_2"]);
        let child = fx.call(HostFn::EvoCrossover, &[]).unwrap();
        let child = network(&child).unwrap();
        assert_eq!(child.borrow().name(), "Offspring");
        assert_eq!(child.borrow().input_size(), 10);
        let species = fx.call(HostFn::EvoSpeciate, &[pop]).unwrap();
        assert!(matches!(species, Value::Array(ref s) if s.borrow().len() == 1));
        assert!(fx
            .call(HostFn::EvoCreatePopulation, &[Value::Number(1e12), Value::Undefined])
            .is_err());
    }

    #[test]
    fn rl_helpers() {
        let mut fx = Fixture::new("");
        let r = Value::array(vec![Value::Number(1.0), Value::Number(2.0)]);
        let v = Value::array(vec![Value::Number(0.5), Value::Number(0.5)]);
        let adv = fx.call(HostFn::RlComputeAdvantage, &[r, v]).unwrap();
        assert_eq!(adv.to_display(), "0.5,1.5");
        let certain = Value::floats(vec![0.0, 1.0, 0.0]);
        assert_eq!(fx.call(HostFn::RlSampleAction, &[certain]).unwrap().to_number(), 1.0);
        let none = Value::floats(vec![0.0, 0.0]);
        assert_eq!(fx.call(HostFn::RlSampleAction, &[none]).unwrap().to_number(), 0.0);
    }

    #[test]
    fn system_and_quant_logs() {
        let mut fx = Fixture::new("");
        let mind = fx.call(HostFn::HiveMind, &[Value::from("Hot"), Value::Undefined]).unwrap();
        fx.call(HostFn::SystemOverclock, &[mind.clone()]).unwrap();
        fx.call(HostFn::SystemClearVram, &[]).unwrap();
        fx.call(HostFn::QuantQuantize, &[mind.clone(), Value::Number(8.0)]).unwrap();
        assert_eq!(
            fx.messages(),
            [
                "[WARN] Overclocking Hot.",
                "VRAM Garbage Collection Triggered.",
                "[Quant] Compressed model to 8-bit precision."
            ]
        );
        assert_eq!(fx.sink.logs[0].kind, LogKind::Error);
        assert_eq!(fx.sink.logs[1].kind, LogKind::System);
        assert_eq!(network(&mind).unwrap().borrow().plasticity, 1.0);

        let student = fx.call(HostFn::HiveMind, &[Value::from("S"), Value::Undefined]).unwrap();
        fx.call(HostFn::QuantDistill, &[mind, student.clone()]).unwrap();
        assert!((network(&student).unwrap().borrow().plasticity - 0.8).abs() < 1e-6);
    }

    #[test]
    fn acha_coder_archive_and_spar() {
        let mut fx = Fixture::new("");
        let coder = fx.call(HostFn::AchaCreateCoder, &[cfg(&[("level", 2.0)])]).unwrap();
        assert_eq!(coder.field("level").to_number(), 2.0);
        fx.call(HostFn::AchaArchive, &[coder.clone(), Value::Number(1.0), Value::from("first")])
            .unwrap();
        match coder.field("memory") {
            Value::Array(items) => {
                let items = items.borrow();
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].field("label").to_display(), "first");
            }
            other => panic!("memory should be an array, got {other:?}"),
        }

        let layer = fx.call(HostFn::ModulesLinear, &[cfg(&[("in", 10.0), ("out", 4.0)])]).unwrap();
        let result = fx.call(HostFn::AchaSpar, &[coder, layer, Value::Undefined]).unwrap();
        let retention = result.field("retention").to_number();
        let win = result.field("win_rate").to_number();
        assert!((0.0..=1.0).contains(&retention));
        assert_eq!(win, if retention > 0.8 { 1.0 } else { 0.0 });
    }

    #[test]
    fn world_and_hive_helpers() {
        let mut fx = Fixture::new("");
        let env = fx.call(HostFn::WorldCreateEnvironment, &[cfg(&[("difficulty", 2.0)])]).unwrap();
        assert_eq!(env.field("step").to_number(), 0.0);
        assert_eq!(env.field("difficulty").to_number(), 2.0);
        let obs = fx.call(HostFn::WorldObserve, &[Value::Null, env]).unwrap();
        assert_eq!(obs.to_f32_vec().unwrap().len(), 10);
        let data = fx.call(HostFn::WorldGenerateData, &[Value::Number(3.0)]).unwrap();
        assert_eq!(data.field("target").to_f32_vec().unwrap().len(), 4);
        let agents = fx.call(HostFn::HiveScanLocalAgents, &[]).unwrap();
        assert_eq!(agents.to_display(), "agi.gb,llm.gb,optimization.gb");
        let swarm = fx.call(HostFn::HiveOptimizeSwarm, &[]).unwrap().to_number();
        assert!((0.5..1.0).contains(&swarm));
        let cluster = fx.call(HostFn::HiveSuperCluster, &[agents]).unwrap();
        assert_eq!(cluster.field("name").to_display(), "SuperCluster");
    }

    #[test]
    fn graph_calls() {
        let mut fx = Fixture::new("");
        fx.call(HostFn::GraphCreateNode, &[Value::from("a"), Value::Null]).unwrap();
        for (to, rel) in [("b", "likes"), ("c", "hates"), ("d", "likes")] {
            fx.call(HostFn::GraphLink, &[Value::from("a"), Value::from(to), Value::from(rel)])
                .unwrap();
        }
        let q = fx.call(HostFn::GraphQuery, &[Value::from("a"), Value::from("likes")]).unwrap();
        assert_eq!(q.to_display(), "b,d");
        assert_eq!(fx.ctx.graph.edges()[0].weight, 1.0);
        let path = fx.call(HostFn::GraphFindPath, &[]).unwrap();
        assert_eq!(path.to_display(), "");
    }

    #[test]
    fn tensor_shapes_are_validated() {
        let mut fx = Fixture::new("");
        let t = fx
            .call(HostFn::Tensor, &[Value::array(vec![Value::Number(2.0), Value::Number(2.0)]), Value::from("identity")])
            .unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 0.0, 0.0, 1.0]);
        let err = fx.call(HostFn::Zeros, &[Value::array(vec![Value::Number(-1.0)])]).unwrap_err();
        assert!(err.to_string().contains("[-1]"));
        assert!(fx.call(HostFn::Rand, &[Value::Undefined]).is_err());
    }

    #[test]
    fn gpu_init_reports_capability() {
        let mut fx = Fixture::new("");
        let ok = fx.call(HostFn::GpuInit, &[]).unwrap().truthy();
        let msg = fx.messages()[0].to_string();
        if ok {
            assert_eq!(msg, "[WebGPU] Enabled.");
            assert!(fx.call(HostFn::GpuDispatch, &[]).unwrap().truthy());
        } else {
            assert_eq!(msg, "[WebGPU] Not supported.");
            assert!(fx.call(HostFn::GpuDispatch, &[]).is_err());
        }
    }

    #[test]
    fn first_number_reads_like_parse_float() {
        assert_eq!(first_number("plasticity: 0.95"), Some(0.95));
        assert_eq!(first_number("p = 1.2.3"), Some(1.2));
        assert_eq!(first_number("none"), None);
        assert_eq!(first_number("dots ..."), None);
    }
}
