use training::config::TrainArgs;
use training::util::run_train;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = TrainArgs::from_env()?;
    run_train(args)?;
    Ok(())
}
