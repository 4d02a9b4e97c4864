use std::{io::BufRead, process, sync::Arc};

use evex::{
    application::{
        error::AppError,
        redeem::{RedeemService, hash_password},
    },
    cache::{ConditionalFileCache, FileCacheConfig},
    config::{self, HashPasswordArgs},
    infra::{
        access_log::AccessLog,
        error::InfraError,
        http::{self, AccessPolicy, AppState},
        telemetry,
    },
    users::{StoreOptions, UserStore},
    util::{Clock, SystemClock},
};
use tokio::{net::TcpListener, sync::Notify};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::HashPassword(args) => run_hash_password(args),
    }
}

fn run_hash_password(args: HashPasswordArgs) -> Result<(), AppError> {
    let password = match args.password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            line
        }
    };

    let password = password.trim();
    if password.is_empty() {
        return Err(AppError::validation("password must not be empty"));
    }

    let hash = hash_password(password).map_err(|err| AppError::unexpected(err.to_string()))?;
    println!("{hash}");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let users = Arc::new(
        UserStore::open(
            &settings.users.directory,
            StoreOptions::default().with_save_delay(settings.users.save_delay),
        )
        .await?,
    );
    info!(
        path = %users.path().display(),
        visitors = users.len(),
        "visitor store loaded"
    );

    let access_log = match &settings.access_log.path {
        Some(path) => Some(Arc::new(
            AccessLog::open(path)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?,
        )),
        None => None,
    };

    let redeem = RedeemService::new(settings.auth.red33m_password_hash.clone(), users.clone());
    if !redeem.is_enabled() {
        warn!("no red33m password hash configured; redeem requests will be refused");
    }

    let state = AppState {
        files: Arc::new(ConditionalFileCache::new(FileCacheConfig::from(
            &settings.cache,
        ))),
        users: users.clone(),
        redeem: Arc::new(redeem),
        content: Arc::new(settings.content.clone()),
        access: access_log.clone().map(|log| AccessPolicy {
            log,
            min_status: settings.access_log.min_status,
            clock: clock.clone(),
        }),
    };

    let result = serve_http(&settings, state).await;

    users.close().await;
    if let Some(log) = access_log {
        log.close().await;
    }
    info!("shutdown complete");

    result
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { trigger.notified().await })
            .into_future(),
    );

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        () = shutdown_signal() => {}
    }

    info!(
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "shutdown requested, draining connections"
    );
    shutdown.notify_one();

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!("connections still open after grace period; aborting");
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
