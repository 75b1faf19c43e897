use assistant_orchestrator::{
    ai::{MockTaskService, TaskService},
    chat::ChatService,
    memory::GlobalMemoryAggregator,
    models::ThreadId,
    orchestrator::{ExecutionMode, RequestOrchestrator, ServiceGateway, UserInput},
    store::{InMemoryThreadStore, ThreadStore},
    workflow::{ScriptedWorkflowBackend, WorkflowCorrelator},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Assistant Orchestrator starting");

    // Create components
    let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
    let memory = Arc::new(GlobalMemoryAggregator::new(store.clone()));
    let tasks: Arc<dyn TaskService> = Arc::new(MockTaskService);
    let chat = Arc::new(ChatService::new(store.clone(), memory, tasks.clone()));
    let workflows = Arc::new(WorkflowCorrelator::new(
        store.clone(),
        Arc::new(ScriptedWorkflowBackend::new()),
    ));

    // Client-side orchestrator over the in-process services
    let gateway = Arc::new(ServiceGateway::new(chat, tasks, workflows));
    let client = RequestOrchestrator::new(gateway);

    // Plain chat turn
    if let Some(handle) = client
        .submit(UserInput::Text(
            "What should I pack for a beach holiday?".to_string(),
        ))
        .await
    {
        handle.await?;
    }

    // Trip planning pauses for preferences, then finishes on resume
    client.set_mode(ExecutionMode::TripPlanning).await;
    if let Some(handle) = client
        .submit(UserInput::Text(
            "Plan a solo trip from Delhi to Goa".to_string(),
        ))
        .await
    {
        handle.await?;
    }

    if let Some(handle) = client
        .submit(UserInput::Text(
            "budget friendly, 4 days, love seafood".to_string(),
        ))
        .await
    {
        handle.await?;
    }

    println!("\n=== CLIENT TRANSCRIPT ===");
    for entry in client.transcript().await {
        println!("[{} | {:?}] {}", entry.role, entry.kind, entry.content);
    }

    // Server-side view of the same conversation, newest page first
    if let Some(raw) = client.active_thread().await {
        let thread_id = ThreadId::parse(&raw)?;
        let page = store.page(&thread_id, 1, 10).await?;
        println!("\n=== THREAD LOG ({} messages) ===", page.total_messages);
        for message in &page.messages {
            println!("[{}] {}", message.role, message.content);
        }
    }

    Ok(())
}
