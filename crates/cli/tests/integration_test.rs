use hedge_bot_core::{
    get_or, keys, ConfigLoader, FileStore, Instrument, InstrumentKey, Settings, Side, StoreBackend,
};
use hedge_bot_orchestrator::WorkerRegistry;
use std::sync::Arc;

/// The operator commands and the running bot open the same directory from
/// different processes; two `FileStore` handles stand in for that here.
#[tokio::test]
async fn test_operator_commands_reach_bot_store() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    let config_path = dir.path().join("Config.toml");
    std::fs::write(
        &config_path,
        format!(
            "[store]\nbackend = \"file\"\npath = {:?}\n\n[settings]\nbet_steps = [500, 1000]\n",
            state_dir.display().to_string()
        ),
    )
    .unwrap();

    let config = ConfigLoader::load_from(&config_path).unwrap();
    assert_eq!(config.store.backend, StoreBackend::File);
    assert_eq!(config.settings.bet_steps, vec![500, 1000]);

    let bot = WorkerRegistry::new(Arc::new(FileStore::open(&config.store.path).unwrap()));
    let operator = WorkerRegistry::new(Arc::new(FileStore::open(&config.store.path).unwrap()));

    bot.publish_settings(&config.settings).await.unwrap();
    bot.set_running(false).await.unwrap();

    operator.set_running(true).await.unwrap();
    assert!(bot.is_running().await.unwrap());

    let step_key = InstrumentKey::Step(Side::Long).for_instrument(Instrument::EurUsd);
    hedge_bot_core::put(bot.store().as_ref(), &step_key, &2usize)
        .await
        .unwrap();

    operator.reset_state().await.unwrap();

    let store = bot.store();
    assert!(!bot.is_running().await.unwrap());
    let step: usize = get_or(store.as_ref(), &step_key, 1).await.unwrap();
    assert_eq!(step, 1);
    let settings: Option<Settings> = get_or(store.as_ref(), keys::SETTINGS, None).await.unwrap();
    assert_eq!(settings.unwrap().bet_steps, vec![500, 1000]);
}
