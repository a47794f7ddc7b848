//! frame-runner: headless host loop for the frame job system.
//!
//! Usage:
//!   frame-runner --seed 12345 --frames 600 --entities 200
//!   frame-runner --config data/jobs.json --json
//!
//! Scatters drifting entities over a square arena, pans a camera across it
//! and drives the job registry once per frame. Drifters spawn children
//! mid-update, leave the world when they cross the arena edge, and every
//! tenth one runs a proximity sensor on the 2D physics step.

use anyhow::Result;
use framejob_core::{
    buffer_pool::BufferPool,
    config::JobConfig,
    registry::{JobEnvironment, JobRegistry},
    scope::{Scope, ScopeLookup},
    self_update::{FrameContext, SelfUpdate, SelfUpdateJob, UpdateSlot},
    simulation_step::{Physics2DStepJob, PhysicsBackend, PhysicsWorld, SimulationStep, StepContext},
    types::{FrameNumber, Seconds, Vec2},
    visibility::{Positioned, Viewpoint, Visible, VisibilityJob},
    Job, JobResult, Subscriber, SubscriberRef,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::cell::{Cell, RefCell};
use std::env;
use std::rc::{Rc, Weak};

const FRAME_DT: Seconds = 1.0 / 60.0;
const ARENA_HALF: f32 = 200.0;
const SENSOR_RADIUS: f32 = 25.0;
const SPAWN_CHANCE: f64 = 0.002;
const MAX_CHILDREN: u32 = 2;

// ── Host-side collaborators ────────────────────────────────────────

/// Toy 2D engine: only counts what it is asked to simulate.
#[derive(Default)]
struct ArenaPhysics {
    steps:     Cell<u64>,
    simulated: Cell<f64>,
}

impl PhysicsBackend for ArenaPhysics {
    fn name(&self) -> &str {
        "arena_2d"
    }

    fn auto_simulation(&self) -> bool {
        false
    }

    fn simulate(&self, delta_time: Seconds) -> anyhow::Result<()> {
        self.steps.set(self.steps.get() + 1);
        self.simulated.set(self.simulated.get() + delta_time);
        Ok(())
    }
}

#[derive(Default)]
struct Stats {
    updates:          Cell<u64>,
    became_visible:   Cell<u64>,
    became_invisible: Cell<u64>,
    spawned:          Cell<u64>,
    despawned:        Cell<u64>,
    sensor_hits:      Cell<u64>,
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

/// State shared by every drifter. Holds the population weakly; the jobs
/// a drifter is subscribed to are what keep it alive.
struct Shared {
    rng:        RefCell<Pcg64Mcg>,
    population: RefCell<Vec<Weak<Drifter>>>,
    sensors:    BufferPool<Vec2>,
    stats:      Stats,
}

impl Shared {
    fn new(seed: u64) -> Self {
        Self {
            rng:        RefCell::new(Pcg64Mcg::seed_from_u64(seed)),
            population: RefCell::new(Vec::new()),
            sensors:    BufferPool::new(),
            stats:      Stats::default(),
        }
    }

    fn alive(&self) -> usize {
        self.population.borrow().iter().filter(|d| d.strong_count() > 0).count()
    }
}

// ── Camera ─────────────────────────────────────────────────────────

struct Camera {
    slot:      UpdateSlot,
    position:  Cell<Vec2>,
    view_size: f32,
}

impl Subscriber for Camera {
    fn name(&self) -> &str {
        "camera"
    }

    fn self_update(self: Rc<Self>) -> Option<Rc<dyn SelfUpdate>> {
        Some(self)
    }

    fn viewpoint(self: Rc<Self>) -> Option<Rc<dyn Viewpoint>> {
        Some(self)
    }
}

impl SelfUpdate for Camera {
    fn update_slot(&self) -> &UpdateSlot {
        &self.slot
    }

    /// Pans back and forth across the arena.
    fn update_frame(&self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        let x = (frame.now() * 0.25).sin() as f32 * ARENA_HALF * 0.75;
        self.position.set(Vec2::new(x, 0.0));
        Ok(())
    }
}

impl Viewpoint for Camera {
    fn position(&self) -> Vec2 {
        self.position.get()
    }

    fn view_size(&self) -> f32 {
        self.view_size
    }
}

// ── Drifter ────────────────────────────────────────────────────────

struct Drifter {
    name:     String,
    me:       Weak<Drifter>,
    shared:   Rc<Shared>,
    slot:     UpdateSlot,
    position: Cell<Vec2>,
    velocity: Vec2,
    size:     f32,
    sensor:   bool,
    children: Cell<u32>,
    /// Driver frame of the last move. Repeat passes revisit everyone.
    moved_on: Cell<FrameNumber>,
}

impl Drifter {
    fn spawn(shared: &Rc<Shared>, name: String, position: Vec2, sensor: bool) -> Rc<Self> {
        let (velocity, size) = {
            let mut rng = shared.rng.borrow_mut();
            let velocity = Vec2::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0));
            (velocity, rng.gen_range(0.5..3.0))
        };
        let drifter = Rc::new_cyclic(|me| Drifter {
            name,
            me: me.clone(),
            shared: shared.clone(),
            slot: UpdateSlot::default(),
            position: Cell::new(position),
            velocity,
            size,
            sensor,
            children: Cell::new(0),
            moved_on: Cell::new(0),
        });
        shared.population.borrow_mut().push(Rc::downgrade(&drifter));
        bump(&shared.stats.spawned);
        drifter
    }

    fn handle(&self) -> Option<SubscriberRef> {
        self.me.upgrade().map(|d| d as SubscriberRef)
    }

    fn out_of_arena(&self) -> bool {
        let p = self.position.get().abs();
        p.x > ARENA_HALF || p.y > ARENA_HALF
    }

    fn maybe_spawn_child(&self, frame: &mut FrameContext<'_>) -> JobResult<()> {
        if self.children.get() >= MAX_CHILDREN {
            return Ok(());
        }
        let roll: f64 = self.shared.rng.borrow_mut().gen();
        if roll >= SPAWN_CHANCE {
            return Ok(());
        }
        self.children.set(self.children.get() + 1);
        let name = format!("{}.{}", self.name, self.children.get());
        let child = Drifter::spawn(&self.shared, name, self.position.get(), false);
        enter_world(frame.jobs(), &(child as SubscriberRef))?;
        // Repeat so the child moves in the frame it was born. Drifters that
        // already moved this frame sit the repeat pass out.
        frame.request_repeat();
        Ok(())
    }
}

impl Subscriber for Drifter {
    fn name(&self) -> &str {
        &self.name
    }

    fn self_update(self: Rc<Self>) -> Option<Rc<dyn SelfUpdate>> {
        Some(self)
    }

    fn simulation_step(self: Rc<Self>, world: PhysicsWorld) -> Option<Rc<dyn SimulationStep>> {
        (self.sensor && world == PhysicsWorld::TwoD).then_some(self as Rc<dyn SimulationStep>)
    }

    fn visibility(self: Rc<Self>) -> Option<Rc<dyn Visible>> {
        Some(self)
    }

    fn positioned(self: Rc<Self>) -> Option<Rc<dyn Positioned>> {
        Some(self)
    }
}

impl SelfUpdate for Drifter {
    fn update_slot(&self) -> &UpdateSlot {
        &self.slot
    }

    fn update_frame(&self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        if self.moved_on.replace(frame.frame()) == frame.frame() {
            return Ok(());
        }
        bump(&self.shared.stats.updates);
        let step = FRAME_DT as f32;
        let p = self.position.get();
        self.position.set(Vec2::new(p.x + self.velocity.x * step, p.y + self.velocity.y * step));

        if self.out_of_arena() {
            if let Some(handle) = self.handle() {
                frame.jobs().unsubscribe(&handle);
                bump(&self.shared.stats.despawned);
            }
            return Ok(());
        }
        self.maybe_spawn_child(frame)?;
        Ok(())
    }
}

impl SimulationStep for Drifter {
    fn before_simulate(&self, _step: &StepContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Counts live neighbours inside the sensor radius.
    fn after_simulate(&self, _step: &StepContext<'_>) -> anyhow::Result<()> {
        let neighbours: Vec<Rc<Drifter>> =
            self.shared.population.borrow().iter().filter_map(Weak::upgrade).collect();
        let mut hits = self.shared.sensors.rent(neighbours.len());
        let me = self.position.get();
        let mut found = 0;
        for other in neighbours.iter().filter(|o| !std::ptr::eq(Rc::as_ptr(o), self)) {
            let offset = (other.position.get() - me).abs();
            if offset.x < SENSOR_RADIUS && offset.y < SENSOR_RADIUS {
                hits[found] = other.position.get();
                found += 1;
            }
        }
        let counter = &self.shared.stats.sensor_hits;
        counter.set(counter.get() + found as u64);
        Ok(())
    }
}

impl Visible for Drifter {
    fn visible_size(&self) -> f32 {
        self.size
    }

    fn on_visible(&self) -> anyhow::Result<()> {
        bump(&self.shared.stats.became_visible);
        Ok(())
    }

    fn on_invisible(&self) -> anyhow::Result<()> {
        bump(&self.shared.stats.became_invisible);
        Ok(())
    }
}

impl Positioned for Drifter {
    fn position(&self) -> Vec2 {
        self.position.get()
    }
}

/// Subscribe to every job a drifter can serve. Jobs reject what does not fit.
fn enter_world(jobs: &JobRegistry, subscriber: &SubscriberRef) -> JobResult<()> {
    jobs.subscribe::<SelfUpdateJob>(subscriber)?;
    jobs.subscribe::<Physics2DStepJob>(subscriber)?;
    jobs.subscribe::<VisibilityJob>(subscriber)?;
    Ok(())
}

// ── Runner ─────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct RunSummary {
    seed:              u64,
    frames:            u64,
    alive:             usize,
    self_updating:     usize,
    visible_now:       usize,
    updates:           u64,
    became_visible:    u64,
    became_invisible:  u64,
    spawned:           u64,
    despawned:         u64,
    physics_steps:     u64,
    simulated_seconds: f64,
    sensor_hits:       u64,
    pooled_buffers:    usize,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let frames = parse_arg(&args, "--frames", 600u64);
    let entities = parse_arg(&args, "--entities", 200usize);
    let json = args.iter().any(|a| a == "--json");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());

    let config = match config_path {
        Some(path) => {
            let config = JobConfig::load(path)?;
            log::info!("loaded job config from {path}");
            config
        }
        None => JobConfig::default(),
    };

    if !json {
        println!("frame-runner");
        println!("  seed:      {seed}");
        println!("  frames:    {frames}");
        println!("  entities:  {entities}");
        println!("  config:    {}", config_path.unwrap_or("(defaults)"));
        println!();
    }

    let scope = Rc::new(Scope::new());
    let physics = Rc::new(ArenaPhysics::default());
    let jobs = JobRegistry::build(
        &config,
        JobEnvironment {
            scope:      scope.clone() as Rc<dyn ScopeLookup>,
            physics_2d: Some(Box::new(physics.clone())),
            physics_3d: None,
        },
    );

    let camera: SubscriberRef = Rc::new(Camera {
        slot:      UpdateSlot::default(),
        position:  Cell::new(Vec2::ZERO),
        view_size: 60.0,
    });
    scope.enter(&camera);
    jobs.subscribe::<SelfUpdateJob>(&camera)?;

    let shared = Rc::new(Shared::new(seed));
    for i in 0..entities {
        let position = {
            let mut rng = shared.rng.borrow_mut();
            Vec2::new(
                rng.gen_range(-ARENA_HALF..ARENA_HALF),
                rng.gen_range(-ARENA_HALF..ARENA_HALF),
            )
        };
        let drifter = Drifter::spawn(&shared, format!("d{i}"), position, i % 10 == 0);
        enter_world(&jobs, &(drifter as SubscriberRef))?;
    }

    for frame in 0..frames {
        jobs.tick(frame as f64 * FRAME_DT);
    }
    log::info!("ran {frames} frames, {} drifters alive", shared.alive());

    let summary = RunSummary {
        seed,
        frames:            jobs.frame(),
        alive:             shared.alive(),
        self_updating:     jobs.job::<SelfUpdateJob>()?.len(),
        visible_now:       jobs.job::<VisibilityJob>()?.work().visible_count(),
        updates:           shared.stats.updates.get(),
        became_visible:    shared.stats.became_visible.get(),
        became_invisible:  shared.stats.became_invisible.get(),
        spawned:           shared.stats.spawned.get(),
        despawned:         shared.stats.despawned.get(),
        physics_steps:     physics.steps.get(),
        simulated_seconds: physics.simulated.get(),
        sensor_hits:       shared.stats.sensor_hits.get(),
        pooled_buffers:    shared.sensors.free_len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(s: &RunSummary) {
    println!("=== RUN SUMMARY ===");
    println!("  frames run:       {}", s.frames);
    println!("  alive:            {}", s.alive);
    println!("  self-updating:    {}", s.self_updating);
    println!("  visible now:      {}", s.visible_now);
    println!("  updates:          {}", s.updates);
    println!("  became visible:   {}", s.became_visible);
    println!("  became invisible: {}", s.became_invisible);
    println!("  spawned:          {}", s.spawned);
    println!("  despawned:        {}", s.despawned);

    println!();
    println!("=== PHYSICS ===");
    println!("  manual steps:     {}", s.physics_steps);
    println!("  simulated:        {:.2}s", s.simulated_seconds);
    println!("  sensor hits:      {}", s.sensor_hits);
    println!("  pooled buffers:   {}", s.pooled_buffers);
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
