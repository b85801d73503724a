use std::time::{Duration, Instant};

use hwmap::{
    layout,
    tasks::Role,
    workload::SyntheticWorkload,
    AccessPolicy, Board, BoardSource, RunConfig, Variant,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn board(policy: AccessPolicy) -> Board {
    Board::open(&BoardSource::Simulated, policy).unwrap()
}

fn workload() -> SyntheticWorkload {
    SyntheticWorkload::with_scratch(Duration::from_micros(200), 256)
}

fn assert_leds_off(board: &Board) {
    assert_eq!(
        board.gpio1.read_word(layout::GPIO1_DR) & layout::GPIO1_LED_ALL,
        0
    );
    assert_eq!(
        board.fpga_pio.read_byte(layout::FPGA_LED) & layout::FPGA_LED_ALL,
        0
    );
}

#[test]
fn three_task_run() {
    init_logger();
    let board = board(AccessPolicy::Serialized);
    let config = RunConfig::fast();
    let report = hwmap::run(&board, &config, workload()).unwrap();

    let output = report.task(Role::Output).unwrap();
    let dependent = report.task(Role::Dependent).unwrap();
    let measurement = report.task(Role::Measurement).unwrap();

    // The measurement loop ends once the counter reaches the threshold; the
    // other two tasks may add a few more before they see the cancellation
    assert!(report.final_count >= 30, "{}", report.final_count);
    assert!(report.final_count <= 35, "{}", report.final_count);
    assert_eq!(
        report.final_count as usize,
        output.iterations + dependent.iterations
    );

    // The output task does most of the counting and signals every fifth
    // count, so the dependent task wakes about 30 / 5 times
    assert!(
        (20..=30).contains(&output.iterations),
        "{}",
        output.iterations
    );
    assert!(dependent.wakes <= output.signals);
    assert!((5..=7).contains(&dependent.wakes), "{}", dependent.wakes);
    assert!(output.signals <= 7, "{}", output.signals);

    assert!(output.cancelled);
    assert!(dependent.cancelled);
    assert!(!measurement.cancelled);
    assert!(measurement.iterations > 0);

    assert_eq!(report.samples.len(), measurement.recorded);
    assert!(report.samples.len() <= config.sample_capacity);
    if let Some(stats) = report.stats {
        assert_eq!(stats.count, report.samples.len());
        assert!(stats.min >= 200_000, "{stats}");
    }

    assert_eq!(
        board.fpga_ram.read_word(layout::FPGA_RAM_CONTROL),
        layout::FPGA_RAM_CONTROL_MARK
    );
    assert_eq!(
        board.gpio1.read_word(layout::GPIO1_DDR),
        layout::GPIO1_LED_ALL
    );
    assert_leds_off(&board);

    board.unmap().unwrap();
}

#[test]
fn unsynchronized_run() {
    init_logger();
    let board = board(AccessPolicy::Unsynchronized);
    let report = hwmap::run(&board, &RunConfig::fast(), workload()).unwrap();
    assert!(report.final_count >= 30);
    assert_leds_off(&board);
}

#[test]
fn two_task_run() {
    init_logger();
    let board = board(AccessPolicy::Serialized);
    let config = RunConfig::fast().two_task();
    assert_eq!(config.variant, Variant::TwoTask { iterations: 30 });
    let report = hwmap::run(&board, &config, || unreachable!()).unwrap();

    assert!(report.task(Role::Measurement).is_none());
    assert_eq!(report.tasks.len(), 2);
    assert!(report.samples.is_empty());
    assert_eq!(report.stats, None);

    let output = report.task(Role::Output).unwrap();
    let dependent = report.task(Role::Dependent).unwrap();
    assert!(!output.cancelled);
    assert!(dependent.cancelled);
    assert!(dependent.wakes <= output.signals);
    assert!(report.final_count >= 30);
    assert!(report.final_count <= 33, "{}", report.final_count);
    assert_leds_off(&board);
}

#[test]
fn cancellation_is_prompt() {
    init_logger();
    let board = board(AccessPolicy::Serialized);
    let mut config = RunConfig::fast();
    config.output.period = Duration::from_secs(60);
    config.dependent.on_time = Duration::from_secs(60);
    config.measurement.settle = Duration::ZERO;
    // The measurement loop is over before it starts
    config.measurement.threshold = 0;

    let start = Instant::now();
    let report = hwmap::run(&board, &config, workload()).unwrap();
    assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());

    assert_eq!(report.final_count, 0);
    assert!(report.samples.is_empty());
    for task in &report.tasks {
        assert_eq!(task.iterations, 0, "{task}");
    }
    assert_leds_off(&board);
}
