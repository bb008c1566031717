//! Utilitarian and RandomUtil selection: argmax, tie-breaking, rank
//! tiers, weighted sampling, and utility aggregation across the tree.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use trellis_types::{Prong, Rank, Strategy, Utility};

use crate::config::{BasicConfig, Config};
use crate::control::{Control, FullControl};
use crate::machine::Machine;
use crate::random::{DefaultRng, UtilityRng};
use crate::state::StateBody;
use crate::tree::RegionDef;

use super::{Event, EventLog};

type Cfg = BasicConfig;

// ============================================================================
// Utilitarian
// ============================================================================

#[derive(Default)]
struct UtilRoot;
impl StateBody<Cfg> for UtilRoot {}

macro_rules! utility_leaf {
    ($name:ident, $utility:expr) => {
        #[derive(Default)]
        struct $name;

        impl StateBody<Cfg> for $name {
            fn utility(&mut self, _ctl: &mut Control<'_, Cfg>) -> Utility {
                Utility::new($utility)
            }
        }
    };
}

utility_leaf!(LowValue, 1.0);
utility_leaf!(HighValue, 3.0);
utility_leaf!(MidValue, 2.0);

#[test]
fn utilitarian_selection_picks_the_argmax() {
    let log = EventLog::default();
    let def = RegionDef::<Cfg>::composite::<UtilRoot>(Strategy::Utilitarian)
        .leaf::<LowValue>()
        .leaf::<HighValue>()
        .leaf::<MidValue>();
    let mut machine = Machine::with_logger(def, (), DefaultRng::seeded(1), log.recorder())
        .expect("tree builds");
    let root = machine.state_id::<UtilRoot>();

    assert!(machine.is_active_t::<HighValue>());

    // Changing to the active region head re-enters without re-selecting,
    // so the whole run records exactly one resolution.
    machine.change_to(root);
    machine.update();
    assert!(machine.is_active_t::<HighValue>());

    let resolutions: Vec<_> = log
        .take()
        .into_iter()
        .filter(|event| matches!(event, Event::UtilityResolution(..)))
        .collect();
    assert_eq!(
        resolutions,
        vec![Event::UtilityResolution(root, Prong::new(1), 3.0)]
    );
}

utility_leaf!(TiedFirst, 2.0);
utility_leaf!(TiedSecond, 2.0);
utility_leaf!(Lesser, 1.0);

#[test]
fn utility_ties_resolve_to_the_lowest_index() {
    let def = RegionDef::<Cfg>::composite::<UtilRoot>(Strategy::Utilitarian)
        .leaf::<TiedFirst>()
        .leaf::<TiedSecond>()
        .leaf::<Lesser>();
    let machine = Machine::new(def, (), DefaultRng::seeded(1)).expect("tree builds");
    assert!(machine.is_active_t::<TiedFirst>());
}

// A composite subtree competes with the product of its head's utility
// and its would-be child's; an orthogonal subtree with the mean of its
// children.
#[derive(Default)]
struct AggRoot;
impl StateBody<Cfg> for AggRoot {}

utility_leaf!(PlainLeaf, 1.0);
utility_leaf!(BranchHead, 2.0);
utility_leaf!(BranchChild, 0.9);

#[test]
fn composite_subtree_utility_is_head_times_child() {
    let def = RegionDef::<Cfg>::composite::<AggRoot>(Strategy::Utilitarian)
        .leaf::<PlainLeaf>()
        .region(
            RegionDef::<Cfg>::composite::<BranchHead>(Strategy::Composite).leaf::<BranchChild>(),
        );
    let machine = Machine::new(def, (), DefaultRng::seeded(1)).expect("tree builds");

    // 2.0 * 0.9 = 1.8 beats the plain leaf's 1.0.
    assert!(machine.is_active_t::<BranchChild>());
}

utility_leaf!(SoloLeaf, 2.5);
utility_leaf!(ParallelHead, 1.0);
utility_leaf!(ParallelLow, 2.0);
utility_leaf!(ParallelHigh, 4.0);

#[test]
fn orthogonal_subtree_utility_is_head_times_mean() {
    let def = RegionDef::<Cfg>::composite::<AggRoot>(Strategy::Utilitarian)
        .leaf::<SoloLeaf>()
        .region(
            RegionDef::<Cfg>::orthogonal::<ParallelHead>()
                .leaf::<ParallelLow>()
                .leaf::<ParallelHigh>(),
        );
    let machine = Machine::new(def, (), DefaultRng::seeded(1)).expect("tree builds");

    // mean(2, 4) = 3 beats the solo leaf's 2.5.
    assert!(machine.is_active_t::<ParallelLow>());
    assert!(machine.is_active_t::<ParallelHigh>());
}

// Selection queries candidates before any of them is constructed, and a
// re-entered region queries bodies that were destructed on the way out;
// dynamic bodies must answer in both windows.
#[derive(Default)]
struct CycleApex;
#[derive(Default)]
struct ChoiceHead;
#[derive(Default)]
struct Elsewhere;
#[derive(Default)]
struct Steady;

impl StateBody<Cfg> for CycleApex {}
impl StateBody<Cfg> for ChoiceHead {}
impl StateBody<Cfg> for Elsewhere {}

impl StateBody<Cfg> for Steady {
    fn utility(&mut self, _ctl: &mut Control<'_, Cfg>) -> Utility {
        Utility::new(1.0)
    }
}

#[derive(Default)]
struct Fickle {
    ticks: u32,
}

impl StateBody<Cfg> for Fickle {
    fn utility(&mut self, _ctl: &mut Control<'_, Cfg>) -> Utility {
        Utility::new(3.0)
    }

    fn update(&mut self, ctl: &mut FullControl<'_, Cfg>) {
        self.ticks += 1;
        if self.ticks == 2 {
            let out = ctl.state_id::<Elsewhere>();
            ctl.change_to(out);
        }
    }
}

#[test]
fn dynamic_bodies_answer_selection_queries_across_reentry() {
    let def = RegionDef::<Cfg>::composite::<CycleApex>(Strategy::Composite)
        .region(
            RegionDef::<Cfg>::composite::<ChoiceHead>(Strategy::Utilitarian)
                .dynamic_leaf::<Fickle>()
                .leaf::<Steady>(),
        )
        .leaf::<Elsewhere>();
    let mut machine = Machine::new(def, (), DefaultRng::seeded(1)).expect("tree builds");

    // The initial resolution queried the dynamic candidate before
    // anything constructed.
    assert!(machine.is_active_t::<Fickle>());

    // Fickle bows out after its second tick.
    machine.update();
    machine.update();
    assert!(machine.is_active_t::<Elsewhere>());

    // Re-entering the region re-runs the resolution against the body
    // that was destructed on the way out.
    let choice = machine.state_id::<ChoiceHead>();
    machine.change_to(choice);
    machine.update();
    assert!(machine.is_active_t::<Fickle>());

    // And the body came back fresh: two ticks again before it leaves.
    machine.update();
    machine.update();
    assert!(machine.is_active_t::<Elsewhere>());
}

// Re-selecting an active region: `utilize` re-runs the resolution (the
// region restarts in place), where a plain change only re-enters.
type Weights = std::rc::Rc<std::cell::Cell<(f32, f32)>>;
type DynCfg = BasicConfig<Weights>;

#[derive(Default)]
struct DynRoot;
impl StateBody<DynCfg> for DynRoot {}

#[derive(Default)]
struct First;

impl StateBody<DynCfg> for First {
    fn utility(&mut self, ctl: &mut Control<'_, DynCfg>) -> Utility {
        Utility::new(ctl.context().get().0)
    }
}

#[derive(Default)]
struct Second;

impl StateBody<DynCfg> for Second {
    fn utility(&mut self, ctl: &mut Control<'_, DynCfg>) -> Utility {
        Utility::new(ctl.context().get().1)
    }
}

#[test]
fn utilize_on_an_active_region_re_resolves() {
    let weights = Weights::new(std::cell::Cell::new((2.0, 1.0)));
    let def = RegionDef::<DynCfg>::composite::<DynRoot>(Strategy::Utilitarian)
        .leaf::<First>()
        .leaf::<Second>();
    let mut machine = Machine::new(def, Weights::clone(&weights), DefaultRng::seeded(1))
        .expect("tree builds");

    assert!(machine.is_active_t::<First>());

    // The world changed; an explicit utilize picks up the new weights.
    weights.set((1.0, 5.0));
    let root = machine.state_id::<DynRoot>();
    machine.utilize(root);
    machine.update();
    assert!(machine.is_active_t::<Second>());

    // A plain change to the active region head re-enters without
    // re-resolving.
    weights.set((9.0, 1.0));
    machine.change_to(root);
    machine.update();
    assert!(machine.is_active_t::<Second>());
}

// ============================================================================
// RandomUtil
// ============================================================================

/// Deterministic RNG for sampling tests; ChaCha keeps its stream stable
/// across releases.
struct ChaRng(ChaCha8Rng);

impl UtilityRng for ChaRng {
    fn next(&mut self) -> f32 {
        use rand::Rng as _;
        self.0.gen_range(0.0..1.0)
    }
}

struct RandCfg;

impl Config for RandCfg {
    type Context = ();
    type Event = ();
    type Rng = ChaRng;
}

#[derive(Default)]
struct RandRoot;
impl StateBody<RandCfg> for RandRoot {}

macro_rules! ranked_leaf {
    ($name:ident, $rank:expr, $utility:expr) => {
        #[derive(Default)]
        struct $name;

        impl StateBody<RandCfg> for $name {
            fn rank(&mut self, _ctl: &mut Control<'_, RandCfg>) -> Rank {
                Rank::new($rank)
            }

            fn utility(&mut self, _ctl: &mut Control<'_, RandCfg>) -> Utility {
                Utility::new($utility)
            }
        }
    };
}

ranked_leaf!(Light, 0, 1.0);
ranked_leaf!(Heavy, 0, 3.0);

#[test]
fn weighted_sampling_tracks_the_utility_ratio() {
    let def = RegionDef::<RandCfg>::composite::<RandRoot>(Strategy::RandomUtil)
        .leaf::<Light>()
        .leaf::<Heavy>();
    let mut machine =
        Machine::new(def, (), ChaRng(ChaCha8Rng::seed_from_u64(7))).expect("tree builds");
    let root = machine.state_id::<RandRoot>();

    let rounds = 2000;
    let mut heavy = 0;
    for _ in 0..rounds {
        machine.randomize(root);
        machine.update();
        if machine.is_active_t::<Heavy>() {
            heavy += 1;
        }
    }

    // Expected share 3/4; five sigma is under 0.05 at this sample size.
    let share = f64::from(heavy) / f64::from(rounds);
    assert!((0.70..0.80).contains(&share), "heavy share {share}");
}

ranked_leaf!(Outranked, 0, 1000.0);
ranked_leaf!(TopOne, 5, 1.0);
ranked_leaf!(TopTwo, 5, 1.0);

#[test]
fn only_the_top_rank_tier_samples() {
    let def = RegionDef::<RandCfg>::composite::<RandRoot>(Strategy::RandomUtil)
        .leaf::<Outranked>()
        .leaf::<TopOne>()
        .leaf::<TopTwo>();
    let mut machine =
        Machine::new(def, (), ChaRng(ChaCha8Rng::seed_from_u64(11))).expect("tree builds");
    let root = machine.state_id::<RandRoot>();

    for _ in 0..50 {
        machine.randomize(root);
        machine.update();
        assert!(
            !machine.is_active_t::<Outranked>(),
            "a lower-rank prong was sampled"
        );
    }
}

#[test]
fn random_selection_logs_the_resolution() {
    let log = EventLog::default();
    let def = RegionDef::<RandCfg>::composite::<RandRoot>(Strategy::RandomUtil)
        .leaf::<Light>()
        .leaf::<Heavy>();
    let machine = Machine::with_logger(
        def,
        (),
        ChaRng(ChaCha8Rng::seed_from_u64(3)),
        log.recorder(),
    )
    .expect("tree builds");
    let root = machine.state_id::<RandRoot>();

    let resolutions: Vec<_> = log
        .take()
        .into_iter()
        .filter(|event| matches!(event, Event::RandomResolution(head, ..) if *head == root))
        .collect();
    assert_eq!(resolutions.len(), 1, "one sample for the initial entry");
}
