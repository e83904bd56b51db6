use crate::commands::{prepare, CommandResult};
use deferra_db::{connect_with_config, migrations, DemoSeedDataset, SeedResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));

        pool.close().await;
        seeded
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", describe(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn describe(seeded: &SeedResult) -> String {
    let verb = if seeded.created { "created" } else { "already present" };
    format!(
        "{} demo users upserted; deferral {} ({}) {verb}, status {}",
        seeded.users_seeded,
        seeded.deferral_code,
        seeded.deferral_id,
        seeded.status.as_str()
    )
}
