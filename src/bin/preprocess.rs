use salesprep::{
    init_logging, log_app_start, logging_config_from_env, pipeline_config_from_env,
    preprocess_data,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let cfg = pipeline_config_from_env()?;
    log_app_start(&logging_cfg, &cfg.data_dir, &cfg.out_dir);

    let output = preprocess_data(&cfg)?;
    let report = &output.report;

    println!(
        "rows: train={} val={} test={} (duplicates removed {}, incomplete dropped {})",
        report.train_rows,
        report.val_rows,
        report.test_rows,
        report.clean.duplicates_removed,
        report.incomplete_rows_dropped
    );
    if let Some([train, val, test]) = report.sequence_windows {
        println!("windows: train={train} val={val} test={test}");
    }
    for path in &report.artifacts {
        println!("wrote {}", path.display());
    }

    Ok(())
}
