use clap::Parser;
use common::index::SkipList;
use common::utils::wait_terminate;
use env_logger::Env;
use log::{error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use owldb::auth::Sessions;
use owldb::db::Shared;
use owldb::ends;
use owldb::schema::SchemaValidator;
use owldb::services::{Create, DatabaseIndex, Delete, Get, Patch, Services};
use owldb::subs::Messager;

/// HTTP-accessible hierarchical JSON document store.
#[derive(Parser, Debug)]
#[command(name = "owldb")]
struct Args {
	/// Port to listen on
	#[arg(short = 'p', default_value_t = 3318)]
	port: u16,
	/// JSON Schema file every document body must satisfy
	#[arg(short = 's')]
	schema: Option<PathBuf>,
	/// Optional token seed file, a JSON object of user -> token
	#[arg(short = 't')]
	tokens: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();

	let env = Env::default()
		.filter_or("LOG_LEVEL", "info")
		.write_style_or("LOG_STYLE", "auto");
	env_logger::init_from_env(env);

	let Some(schema_path) = args.schema else {
		eprintln!("Error: Schema file not specified. Use -s <schema filename>");
		std::process::exit(1);
	};
	let validator = match SchemaValidator::from_file(&schema_path) {
		Ok(validator) => validator,
		Err(err) => {
			eprintln!("Error: bad schema file: {err}");
			std::process::exit(1);
		}
	};

	let sessions = match &args.tokens {
		Some(path) => Sessions::with_seed_file(path),
		None => Sessions::new(),
	};

	let shared = Arc::new(Shared {
		validator,
		messager: Messager::new(),
	});
	let dbs: DatabaseIndex = Arc::new(SkipList::for_names());
	let services = Arc::new(Services {
		create: Create::new(dbs.clone(), shared),
		get: Get::new(dbs.clone()),
		delete: Delete::new(dbs.clone()),
		patch: Patch::new(dbs),
		sessions,
	});

	let (shutdown_tx, shutdown_rx) = watch::channel(());
	let app = ends::router(services, shutdown_rx.clone());

	let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
	info!("Listening on '{addr}'.");

	let mut server_shutdown = shutdown_rx;
	let server = axum::Server::bind(&addr)
		.serve(app.into_make_service())
		.with_graceful_shutdown(async move {
			if server_shutdown.changed().await.is_err() {
				error!("Shutdown channel dropped");
			} else {
				info!("Http server shutting down gracefully");
			}
		});
	let server = tokio::spawn(server);

	wait_terminate().await;

	info!("Telling everyone to shutdown.");
	shutdown_tx.send(()).unwrap();

	match server.await {
		Ok(Ok(())) => info!("Server closed"),
		Ok(Err(err)) => error!("Server closed with {err:?}"),
		Err(err) => error!("Server task panicked: {err:?}"),
	}
}
