use clap::Parser;
use sentinel::cli::{
    Args, build_config, build_registry, handle_generate_key, handle_make_admin, init_logging,
    load_signing_key, load_verification_keys, open_database,
};
use sentinel::keys::KeyMaterial;
use sentinel::{create_app, init_cleanup};
use tracing::{error, info};

fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    if let Some(path) = &args.generate_key {
        let ok = handle_generate_key(path);
        std::process::exit(if ok { 0 } else { 1 });
    }

    // Key material is read (and its env var cleared) before any runtime thread exists.
    let Some(keys) = load_signing_key(args.signing_key_file.as_deref(), args.ephemeral_keys)
    else {
        std::process::exit(1);
    };

    let Some(verification_keys) = load_verification_keys(&args.verify_key_file) else {
        std::process::exit(1);
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            std::process::exit(1);
        }
    };

    runtime.block_on(serve(args, keys, verification_keys));
}

async fn serve(args: Args, keys: KeyMaterial, verification_keys: Vec<Vec<u8>>) {
    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(username) = &args.make_admin {
        if !handle_make_admin(&db, username).await {
            std::process::exit(1);
        }
    }

    let registry = build_registry(args.registry, &db);
    let Some(config) = build_config(&args, db, keys, verification_keys, registry.clone()) else {
        std::process::exit(1);
    };

    init_cleanup(registry).await;

    let app = create_app(&config);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(_) => info!(address = %addr, "Listening"),
    }

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
