use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::ServerConfig;
use crate::publisher::LeaderboardPublisher;
use crate::queue::JobQueue;
use crate::routes::{
    delete_contest_handler, delete_problem_handler, get_contest_handler,
    get_contest_leaderboard_handler, get_contest_registrations_handler, get_contests_handler,
    get_leaderboard_handler, get_practice_problems_handler, get_problem_handler,
    get_problem_leaderboard_handler, get_problems_handler, get_registration_status_handler,
    json_error_handler, leaderboard_stream_handler, post_contest_handler, post_problem_handler,
    post_run_handler, post_user_create_handler, post_user_exists_handler, put_contest_handler,
    put_problem_handler, query_error_handler, register_contest_handler,
};
use crate::score::ScoreLedger;

pub fn build_server(
    server_config: ServerConfig,
    db_pool: Arc<SqlitePool>,
    queue: Arc<JobQueue>,
    ledger: Arc<ScoreLedger>,
    publisher: Arc<LeaderboardPublisher>,
) -> std::io::Result<Server> {
    let db_pool = web::Data::from(db_pool);
    let queue = web::Data::from(queue);
    let ledger = web::Data::from(ledger);
    let publisher = web::Data::from(publisher);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(queue.clone())
            .app_data(ledger.clone())
            .app_data(publisher.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_run_handler)
            .service(post_problem_handler)
            .service(put_problem_handler)
            .service(delete_problem_handler)
            .service(get_problems_handler)
            .service(get_practice_problems_handler)
            .service(get_problem_leaderboard_handler)
            .service(get_problem_handler)
            .service(post_contest_handler)
            .service(put_contest_handler)
            .service(delete_contest_handler)
            .service(get_contests_handler)
            .service(register_contest_handler)
            .service(get_contest_registrations_handler)
            .service(get_registration_status_handler)
            .service(get_contest_leaderboard_handler)
            .service(leaderboard_stream_handler)
            .service(get_contest_handler)
            .service(get_leaderboard_handler)
            .service(post_user_create_handler)
            .service(post_user_exists_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
