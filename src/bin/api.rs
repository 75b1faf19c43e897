use assistant_orchestrator::{
    ai::{AiServiceClient, MockTaskService, TaskService},
    api::{start_server, ApiState},
    chat::ChatService,
    jobs::JobQueueClient,
    memory::GlobalMemoryAggregator,
    store,
    workflow::{ScriptedWorkflowBackend, WorkflowBackend, WorkflowCorrelator},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Assistant Orchestrator - API Server");
    info!("📍 Port: {}", api_port);

    // Create components
    let store = store::from_env();
    let memory = Arc::new(GlobalMemoryAggregator::new(store.clone()));

    let (tasks, backend): (Arc<dyn TaskService>, Arc<dyn WorkflowBackend>) =
        match AiServiceClient::from_env() {
            Some(client) => {
                let client = Arc::new(client);
                (client.clone(), client)
            }
            None => {
                eprintln!("⚠️  AI_SERVICE_BASE_URL not set in .env");
                eprintln!("📌 Falling back to the scripted in-process services");
                (
                    Arc::new(MockTaskService),
                    Arc::new(ScriptedWorkflowBackend::new()),
                )
            }
        };

    let chat = Arc::new(ChatService::new(store.clone(), memory, tasks.clone()));
    let workflows = Arc::new(WorkflowCorrelator::new(store.clone(), backend));
    let jobs = JobQueueClient::from_env().map(Arc::new);
    if jobs.is_none() {
        info!("Job queue not configured, document ingestion disabled");
    }

    let state = ApiState {
        store,
        chat,
        workflows,
        jobs,
    };

    info!("✅ Services initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(state, api_port).await?;

    Ok(())
}
