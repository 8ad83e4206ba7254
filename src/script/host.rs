//! The seam between the interpreter and whoever embeds it.
//!
//! The interpreter knows the `GB` surface only as a closed set of [`HostFn`]
//! identifiers; what they do is up to the [`Host`].

use std::rc::Rc;

use super::interp::Interrupt;
use super::value::{Object, Value};

pub trait Host {
    fn call(&mut self, func: HostFn, args: &[Value]) -> Result<Value, Interrupt>;

    /// Called at the top of every loop iteration: yield, then honour a stop.
    fn checkpoint(&mut self) -> Result<(), Interrupt>;

    /// Uniform in `[0, 1)`; backs `Math.random`.
    fn random(&mut self) -> f64;

    /// `console.log` output.
    fn log(&mut self, message: &str);
}

macro_rules! host_fns {
    ($( $variant:ident => $path:literal ),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum HostFn {
            $( $variant, )*
        }

        /// Every function reachable from the `GB` object, by dotted path.
        pub const CATALOGUE: &[(&str, HostFn)] = &[
            $( ($path, HostFn::$variant), )*
        ];

        impl HostFn {
            pub fn path(self) -> &'static str {
                match self {
                    $( HostFn::$variant => $path, )*
                }
            }
        }
    };
}

host_fns! {
    Tensor => "Tensor",
    Zeros => "zeros",
    Rand => "rand",
    Train => "train",
    Evaluate => "evaluate",
    SaveModel => "saveModel",
    LoadModel => "loadModel",

    ModulesLinear => "Modules.Linear",
    ModulesMlp => "Modules.MLP",
    ModulesTransformer => "Modules.Transformer",
    ModulesCnn => "Modules.CNN",
    ModulesWorldModel => "Modules.WorldModel",
    ModelsWorldModel => "Models.WorldModel",

    WorldCreateEnvironment => "World.createEnvironment",
    WorldGenerateData => "World.generateData",
    WorldObserve => "World.observe",
    WorldAct => "World.act",

    GoalsSetGoal => "Goals.setGoal",
    GoalsReward => "Goals.reward",
    GoalsGenerateSubgoals => "Goals.generateSubgoals",
    GoalsSelfEvaluate => "Goals.selfEvaluate",

    MemoryLongTermStore => "Memory.longTermStore",
    MemoryRetrieve => "Memory.retrieve",
    MemoryForget => "Memory.forget",

    CodeSelfEdit => "Code.selfEdit",
    CodeRollback => "Code.rollback",

    AgentsCommunicate => "Agents.communicate",
    AgentsNegotiate => "Agents.negotiate",

    MetaOptimizeObjective => "Meta.optimizeObjective",

    GraphCreateNode => "Graph.createNode",
    GraphLink => "Graph.link",
    GraphQuery => "Graph.query",
    GraphFindPath => "Graph.findPath",

    EvoCreatePopulation => "Evo.createPopulation",
    EvoMutate => "Evo.mutate",
    EvoCrossover => "Evo.crossover",
    EvoSpeciate => "Evo.speciate",

    RlComputeAdvantage => "RL.computeAdvantage",
    RlSampleAction => "RL.sampleAction",
    RlUpdatePolicy => "RL.updatePolicy",

    QuantQuantize => "Quant.quantize",
    QuantDistill => "Quant.distill",

    SystemAllocateThreads => "System.allocateThreads",
    SystemClearVram => "System.clearVRAM",
    SystemOverclock => "System.overclock",

    GpuInit => "GPU.init",
    GpuDispatch => "GPU.dispatch",

    FsList => "FileSystem.list",
    FsRead => "FileSystem.read",
    FsExists => "FileSystem.exists",
    FsIsDirectory => "FileSystem.isDirectory",

    HiveMind => "hive.HiveMind",
    HiveTrainTask => "hive.trainTask",
    HiveScanLocalAgents => "hive.scanLocalAgents",
    HiveSuperCluster => "hive.SuperCluster",
    HiveOptimizeSwarm => "hive.optimizeSwarm",
    HiveIsAlreadyRunning => "hive.isAlreadyRunning",
    // Reached as a member of `GB.hive.HiveMind`, see `HostFn::member`.
    HiveAutoExpandIfReady => "hive.HiveMind.autoExpandIfReady",

    AchaCreateCoder => "ACHA.createCoder",
    AchaArchive => "ACHA.archive",
    AchaSpar => "ACHA.spar",

    UtilsLog => "Utils.log",
    UtilsSleep => "Utils.sleep",
    UtilsTimer => "Utils.timer",

    VisualPlot => "Visual.plot",
    VisualHeatmap => "Visual.heatmap",
    VisualPlotWeights => "Visual.plotWeights",

    ControlGetSignal => "Control.getSignal",
    ControlRequestConfirmation => "Control.requestConfirmation",

    RandomNormal => "RandomOps.normal",
    RandomPerturb => "RandomOps.perturb",
    RandomSample => "RandomOps.sample",

    AutoDiffGrad => "AutoDiff.grad",
}

impl HostFn {
    /// Last path segment, used in error messages and `String(fn)`.
    pub fn name(self) -> &'static str {
        let path = self.path();
        path.rsplit('.').next().unwrap_or(path)
    }

    /// Properties hanging off a host function value.
    pub fn member(self, key: &str) -> Option<HostFn> {
        match (self, key) {
            (HostFn::HiveMind, "autoExpandIfReady") => Some(HostFn::HiveAutoExpandIfReady),
            _ => None,
        }
    }
}

/// Build the `GB` namespace object from [`CATALOGUE`].
pub fn build_gb() -> Value {
    let root: Value = Object::new().into();
    for &(path, func) in CATALOGUE {
        if func == HostFn::HiveAutoExpandIfReady {
            continue;
        }
        let segments: Vec<&str> = path.split('.').collect();
        let (leaf, parents) = match segments.split_last() {
            Some(split) => split,
            None => continue,
        };
        let mut node = root.clone();
        for segment in parents {
            let next = match &node {
                Value::Object(o) => {
                    let existing = o.borrow().get(segment).cloned();
                    match existing {
                        Some(v @ Value::Object(_)) => v,
                        _ => {
                            let child: Value = Object::new().into();
                            o.borrow_mut().set(Rc::<str>::from(*segment), child.clone());
                            child
                        }
                    }
                }
                _ => break,
            };
            node = next;
        }
        if let Value::Object(o) = &node {
            o.borrow_mut().set(Rc::<str>::from(*leaf), Value::Host(func));
        }
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gb_tree_matches_catalogue() {
        let gb = build_gb();
        let linear = gb.field("Modules").field("Linear");
        assert!(matches!(linear, Value::Host(HostFn::ModulesLinear)));
        let hive_mind = gb.field("hive").field("HiveMind");
        assert!(matches!(hive_mind, Value::Host(HostFn::HiveMind)));
        assert!(matches!(gb.field("zeros"), Value::Host(HostFn::Zeros)));
    }

    #[test]
    fn hive_mind_exposes_auto_expand() {
        assert_eq!(
            HostFn::HiveMind.member("autoExpandIfReady"),
            Some(HostFn::HiveAutoExpandIfReady)
        );
        assert_eq!(HostFn::Zeros.member("autoExpandIfReady"), None);
        assert_eq!(HostFn::UtilsLog.name(), "log");
    }
}
