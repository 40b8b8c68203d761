#![allow(clippy::upper_case_acronyms)]

use pingora_core::apps::HttpServerOptions;
use pingora_core::listeners::tls::TlsSettings;
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service_with_name;

use folio::config::{Config, Tls};
use folio::core::SiteContainer;
use folio::logging::Logger;
use folio::service::{http::build_http_service, status::StatusHttpApp};

fn main() {
    // Read command-line arguments
    let opt = Opt::parse_args();

    // Load configuration with optional override
    let config = Config::load_yaml_with_opt_override(&opt).expect("Failed to load configuration");

    // Initialize logging, to a file when configured
    let logger = config.log.clone().map(Logger::new);
    match &logger {
        Some(logger) => logger.init_env_logger(),
        None => env_logger::init(),
    }

    // Register the site, themes, modules and execution paths
    log::info!("Configuring site {}...", config.site.name);
    let container = SiteContainer::in_memory();
    container
        .configure(&config)
        .expect("Failed to configure site");

    // Bring modules to their configured states before accepting traffic
    log::info!("Converging modules...");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build bootstrap runtime");
    let report = runtime.block_on(container.converge());
    drop(runtime);
    log::info!(
        "Converged in {} passes, {} transitions, {} stalled",
        report.passes,
        report.transitions.len(),
        report.stalled.len()
    );

    let http_service = build_http_service(&container);

    // Create Pingora server with optional configuration
    let mut folio_server = Server::new_with_opt_and_conf(Some(opt), config.pingora);

    // Create HTTP service with name
    let mut http_service =
        http_proxy_service_with_name(&folio_server.configuration, http_service, "folio");

    // Add listeners from configuration
    log::info!("Adding listeners...");
    for list_cfg in config.listeners {
        match list_cfg.tls {
            Some(Tls {
                cert_path,
                key_path,
            }) => {
                let mut settings = TlsSettings::intermediate(&cert_path, &key_path)
                    .expect("Adding TLS listener shouldn't fail");
                if list_cfg.offer_h2 {
                    settings.enable_h2();
                }
                http_service.add_tls_with_settings(&list_cfg.address.to_string(), None, settings);
            }
            None => {
                if list_cfg.offer_h2c {
                    if let Some(http_logic) = http_service.app_logic_mut() {
                        let mut http_server_options = HttpServerOptions::default();
                        http_server_options.h2c = true;
                        http_logic.server_options = Some(http_server_options);
                    }
                }
                http_service.add_tcp(&list_cfg.address.to_string());
            }
        }
    }

    // Bootstrapping and server startup
    log::info!("Bootstrapping...");
    folio_server.bootstrap();

    log::info!("Bootstrapped. Adding Services...");
    folio_server.add_service(http_service);

    if let Some(status) = &config.status {
        folio_server.add_service(StatusHttpApp::status_http_service(status, &container));
    }
    if let Some(logger) = logger {
        folio_server.add_service(logger);
    }

    log::info!("Starting Server...");
    folio_server.run_forever();
}
