// src/main.rs

mod app_state;
mod config;
mod contact;
mod contributor;
mod emails;
mod error;
mod group_task;
mod identity;
mod individual_task;
mod jobs;
mod models;
mod notifier;
mod services;
mod store;
mod tally;
mod trainee;
mod validation;

#[cfg(test)]
mod testing;

use std::io;
use std::sync::Arc;

use actix::AsyncContext;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::info;

use crate::app_state::AppState;
use crate::config::{Config, StoreBackend};
use crate::contact::contact_us;
use crate::contributor::{get_me, list_contributors, register_contributor};
use crate::group_task::{
    correct_group_task, create_group, create_group_task, deliver_group_task, extend_group_task,
    get_group, get_group_task,
};
use crate::identity::{Authentication, IdentityVerifier};
use crate::individual_task::{correct_task, create_task, deliver_task, extend_task, get_task};
use crate::jobs::{ActorJobTrigger, JobRunner};
use crate::notifier::HttpMailer;
use crate::services::{Deps, Services};
use crate::store::{MemoryStore, MongoStore, RecordStore};
use crate::trainee::{accept, apply, drop_out, get_trainee, vote};

async fn open_store(config: &Config) -> io::Result<Arc<dyn RecordStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            info!("Using the in-memory record store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Mongo => {
            let uri = config.mongo_uri.as_deref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "MONGO_URI must be set")
            })?;
            let store = MongoStore::init(uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            info!("Connected to MongoDB database {}", config.database_name);
            Ok(Arc::new(store))
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    let store = open_store(&config).await?;
    let notifier = Arc::new(HttpMailer::new(
        &config.mail_api_url,
        &config.mail_api_key,
        &config.sender_email,
    ));

    // The runner needs the services and the services need the runner's
    // address, so the address is taken before the actor starts.
    let runner_ctx = actix::Context::<JobRunner>::new();
    let trigger = Arc::new(ActorJobTrigger::new(runner_ctx.address()));
    let services = Services::new(Deps {
        store,
        notifier,
        jobs: trigger,
        settings: Arc::new(config.workflow.clone()),
    });
    runner_ctx.run(JobRunner::new(services.clone(), &config));

    let verifier = Arc::new(IdentityVerifier::new(&config.jwt_secret));
    let frontend_origin = config.frontend_origin.clone();
    let bind_address = config.bind_address.clone();

    info!("Program: {}", config.workflow.program);
    info!("Server running at http://{}", bind_address);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(verifier.clone()))
            .app_data(web::Data::new(AppState {
                services: services.clone(),
            }))
            // TRAINEES
            .service(
                web::scope("/trainees")
                    .route("", web::post().to(apply))
                    .service(
                        web::scope("/{trainee_id}")
                            .route("", web::get().to(get_trainee))
                            .route("/votes", web::post().to(vote))
                            .route("/accept", web::post().to(accept))
                            .route("/drop-out", web::post().to(drop_out)),
                    ),
            )
            // CONTRIBUTORS
            .service(
                web::scope("/contributors")
                    .route("", web::get().to(list_contributors))
                    .route("", web::post().to(register_contributor))
                    .route("/me", web::get().to(get_me)),
            )
            // INDIVIDUAL TASKS
            .service(
                web::scope("/tasks")
                    .route("", web::post().to(create_task))
                    .service(
                        web::scope("/{task_id}")
                            .route("", web::get().to(get_task))
                            .route("/deliver", web::post().to(deliver_task))
                            .route("/correct", web::post().to(correct_task))
                            .route("/extend", web::post().to(extend_task)),
                    ),
            )
            // GROUPS
            .service(
                web::scope("/groups")
                    .route("", web::post().to(create_group))
                    .route("/{group_id}", web::get().to(get_group)),
            )
            // GROUP TASKS
            .service(
                web::scope("/group-tasks")
                    .route("", web::post().to(create_group_task))
                    .service(
                        web::scope("/{task_id}")
                            .route("", web::get().to(get_group_task))
                            .route("/deliver", web::post().to(deliver_group_task))
                            .route("/correct", web::post().to(correct_group_task))
                            .route("/extend", web::post().to(extend_group_task)),
                    ),
            )
            .route("/contact", web::post().to(contact_us))
    })
    .bind(bind_address)?
    .run()
    .await
}
