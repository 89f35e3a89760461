use rfsoc_compiler_backend::*;

fn main() -> Result<()> {
    let mut exp = Experiment::new();
    exp.dac_pulse("drive", 1, 0., 2e-6, None, Waveform::new_sine(10e6, Some(0.5), None), 0., false)?;
    exp.adc_pulse("readout", 2, 0.2e-6, 1e-6, Some("drive"), AcqMode::Accumulated)?;
    exp.adc_pulse("trace", 3, 0., 1e-6, Some("drive"), AcqMode::Raw)?;

    let compiled = exp.compile(100, Some(1e6))?;
    for op in &compiled.program.ops {
        println!("{}", op);
    }
    println!("{}", compiled.program.to_command());
    println!(
        "{} ticks per repetition, {} words expected",
        compiled.program.total_ticks,
        compiled.plan.expected_words()
    );
    Ok(())
}
