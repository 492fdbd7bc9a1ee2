use async_trait::async_trait;
use eventrelay_application::error::AppError;
use eventrelay_application::{AppContext, EventPublisher, InMemoryEventStore};
use eventrelay_domain::codec::JsonCodec;
use eventrelay_domain::context::ExecutionContext;
use eventrelay_domain::event::{DomainEvent, Event, TypeRegistry};
use eventrelay_domain::eventing::{
    DispatchEngine, DispatchEngineConfig, DispatcherConfig, EventDispatcher, EventHandler,
    ExponentialBackoff, HandledEventType, InMemoryEventBus, RetryScheduler, RetryStrategy,
};
use eventrelay_domain::persist::InMemoryConsumeRecordStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum AccountError {
    #[error("account already opened: {0}")]
    AlreadyOpened(String),
    #[error("account not opened: {0}")]
    NotOpened(String),
    #[error("insufficient funds: balance={balance}, requested={requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountOpened {
    account_id: String,
    initial_balance: i64,
}

impl DomainEvent for AccountOpened {
    const EVENT_TYPE: &'static str = "account.opened";
    const DESCRIPTION: &'static str = "account opened with an initial balance";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountDeposited {
    account_id: String,
    amount: i64,
}

impl DomainEvent for AccountDeposited {
    const EVENT_TYPE: &'static str = "account.deposited";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountWithdrawn {
    account_id: String,
    amount: i64,
}

impl DomainEvent for AccountWithdrawn {
    const EVENT_TYPE: &'static str = "account.withdrawn";
    const MAX_RETRIES: Option<u32> = Some(3);
}

/// 写模型：只负责校验并 raise 事件
#[derive(Default)]
struct AccountService {
    balances: Mutex<HashMap<String, i64>>,
}

impl AccountService {
    fn open(&self, id: &str, initial_balance: i64) -> Result<(), AccountError> {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        if balances.contains_key(id) {
            return Err(AccountError::AlreadyOpened(id.to_string()));
        }
        balances.insert(id.to_string(), initial_balance);
        ExecutionContext::raise(Event::new(AccountOpened {
            account_id: id.to_string(),
            initial_balance,
        }));
        Ok(())
    }

    fn deposit(&self, id: &str, amount: i64) -> Result<(), AccountError> {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        let balance = balances
            .get_mut(id)
            .ok_or_else(|| AccountError::NotOpened(id.to_string()))?;
        *balance += amount;
        ExecutionContext::raise(Event::new(AccountDeposited {
            account_id: id.to_string(),
            amount,
        }));
        Ok(())
    }

    fn withdraw(&self, id: &str, amount: i64) -> Result<(), AccountError> {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        let balance = balances
            .get_mut(id)
            .ok_or_else(|| AccountError::NotOpened(id.to_string()))?;
        if *balance < amount {
            return Err(AccountError::InsufficientFunds {
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        ExecutionContext::raise(Event::new(AccountWithdrawn {
            account_id: id.to_string(),
            amount,
        }));
        Ok(())
    }
}

/// 读模型投影：按事件累计余额
#[derive(Default)]
struct LedgerProjector {
    ledger: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl EventHandler for LedgerProjector {
    fn handler_name(&self) -> &str {
        "ledger"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::Many(vec![
            AccountOpened::EVENT_TYPE.into(),
            AccountDeposited::EVENT_TYPE.into(),
            AccountWithdrawn::EVENT_TYPE.into(),
        ])
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let (account_id, delta) = if let Some(e) = event.payload_as::<AccountOpened>() {
            (e.account_id.clone(), e.initial_balance)
        } else if let Some(e) = event.payload_as::<AccountDeposited>() {
            (e.account_id.clone(), e.amount)
        } else if let Some(e) = event.payload_as::<AccountWithdrawn>() {
            (e.account_id.clone(), -e.amount)
        } else {
            anyhow::bail!("unexpected payload for {}", event.event_type());
        };

        let mut ledger = self
            .ledger
            .lock()
            .map_err(|e| anyhow::anyhow!("ledger poisoned: {e}"))?;
        *ledger.entry(account_id).or_default() += delta;
        Ok(())
    }
}

/// 大额取款通知：短信网关前两次调用超时
#[derive(Default)]
struct SmsNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl EventHandler for SmsNotifier {
    fn handler_name(&self) -> &str {
        "sms"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::One(AccountWithdrawn::EVENT_TYPE.into())
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= 2 {
            anyhow::bail!("sms gateway timeout (call {n})");
        }
        info!(
            event_id = event.id(),
            trace_id = ?ExecutionContext::current_trace_id(),
            "withdrawal sms sent"
        );
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let registry = Arc::new(
        TypeRegistry::builder()
            .codec(JsonCodec)
            .register::<AccountOpened>()
            .register::<AccountDeposited>()
            .register::<AccountWithdrawn>()
            .build()?,
    );
    let records = Arc::new(InMemoryConsumeRecordStore::new());
    let bus = Arc::new(InMemoryEventBus::new(1024));
    let ledger = Arc::new(LedgerProjector::default());
    let handlers: Vec<Arc<dyn EventHandler>> =
        vec![ledger.clone(), Arc::new(SmsNotifier::default())];

    let dispatcher = Arc::new(
        EventDispatcher::builder()
            .registry(registry.clone())
            .store(records.clone())
            .retry_strategy(RetryStrategy::ExponentialBackoff(ExponentialBackoff::new(
                vec![Duration::from_millis(100), Duration::from_millis(300)],
            )?))
            .event_handlers(handlers)
            .config(DispatcherConfig {
                consumer_group: "demo".to_string(),
                handler_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            })
            .build(),
    );
    let engine = Arc::new(
        DispatchEngine::builder()
            .event_bus(bus.clone())
            .scheduler(Arc::new(
                RetryScheduler::builder().dispatcher(dispatcher.clone()).build(),
            ))
            .config(DispatchEngineConfig {
                retry_interval: Duration::from_millis(100),
                listener_concurrency: 16,
            })
            .build(),
    );
    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let publisher = EventPublisher::builder()
        .registry(registry)
        .event_store(Arc::new(InMemoryEventStore::new()))
        .event_bus(bus)
        .consumers(vec![dispatcher])
        .build();
    let accounts = AccountService::default();
    let ctx = AppContext::for_user("teller-1");
    let id = "acc-1";

    publisher
        .run(&ctx, || async { Ok::<_, AppError>(accounts.open(id, 1000)?) })
        .await?;
    publisher
        .run(&ctx, || async { Ok::<_, AppError>(accounts.deposit(id, 500)?) })
        .await?;
    publisher
        .run(&ctx, || async { Ok::<_, AppError>(accounts.withdraw(id, 200)?) })
        .await?;

    // 业务失败：不会发布任何事件
    let rejected = publisher
        .run(&ctx, || async {
            Ok::<_, AppError>(accounts.withdraw(id, 10_000)?)
        })
        .await;
    println!("rejected withdrawal: {:?}", rejected.err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.shutdown();
    handle.join().await;

    println!("\n=== ledger ===");
    for (account, balance) in ledger.ledger.lock().unwrap_or_else(|e| e.into_inner()).iter() {
        println!("{account}: {balance}");
    }
    println!("\n=== consume records ===");
    for record in records.records()? {
        println!(
            "{} {} attempts={}/{} message={:?}",
            record.event_type(),
            record.status(),
            record.retry_count(),
            record.max_retry_times(),
            record.message()
        );
    }
    Ok(())
}
