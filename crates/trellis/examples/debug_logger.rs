//! Attachable logger example: a console sink observing every lifecycle
//! hook and transition of a three-state machine.

use trellis::prelude::*;

// Data shared between machine states and outside code.
#[derive(Default)]
struct Context;

/// The event `From` reacts to.
struct Go;

type Cfg = BasicConfig<Context, Go>;

/// Prints every method invocation and transition request.
struct ConsoleLogger;

impl Logger<Cfg> for ConsoleLogger {
    fn record_method(&mut self, _context: &mut Context, origin: StateId, method: Method) {
        println!("{origin}: {method}()");
    }

    fn record_transition(
        &mut self,
        _context: &mut Context,
        origin: StateId,
        transition_type: TransitionType,
        target: StateId,
    ) {
        println!("{origin}: {transition_type} -> {target}");
    }
}

#[derive(Default)]
struct Top;

#[derive(Default)]
struct From;

#[derive(Default)]
struct To;

impl StateBody<Cfg> for Top {}

impl StateBody<Cfg> for From {
    fn react(&mut self, _event: &Go, ctl: &mut FullControl<'_, Cfg>) {
        let to = ctl.state_id::<To>();
        ctl.change_to(to);
    }
}

impl StateBody<Cfg> for To {}

fn main() {
    let def = RegionDef::<Cfg>::composite::<Top>(Strategy::Composite)
        .leaf::<From>()
        .leaf::<To>();

    println!("---------- ctor: ---------");
    let mut machine = Machine::with_logger(
        def,
        Context,
        DefaultRng::new(),
        Box::new(ConsoleLogger),
    )
    .expect("valid tree");

    println!("--------- update: --------");
    machine.update();

    println!("--------- react: ---------");
    machine.react(&Go);

    println!("-- external transition: --");
    machine.change_to_t::<From>();
    machine.update();

    println!("--------- detach: --------");
    machine.detach_logger();
    machine.update();

    println!("---------- done! ---------");
}
