use crate::domain::model::OrderNotification;
use crate::domain::ports::Notifier;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub recipients: Vec<String>,
    pub subject_prefix: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from", &self.from)
            .field("recipients", &self.recipients)
            .field("subject_prefix", &self.subject_prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// 郵件標題：`{prefix} Order {單號或 id} - {客戶}`
pub fn render_subject(prefix: &str, notification: &OrderNotification) -> String {
    let mut subject = format!("{} Order {}", prefix, notification.display_reference());
    if let Some(customer) = &notification.customer_name {
        let _ = write!(subject, " - {}", customer);
    }
    subject.trim().to_string()
}

/// 純文字郵件內容，時間以營業時區顯示
pub fn render_plain_text(notification: &OrderNotification, timezone: Tz) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "A new order contains monitored items.");
    let _ = writeln!(body);
    let _ = writeln!(body, "Order:    {}", notification.display_reference());
    let _ = writeln!(body, "Order id: {}", notification.order_id);
    if let Some(created_at) = notification.created_at {
        let _ = writeln!(
            body,
            "Created:  {}",
            created_at.with_timezone(&timezone).format("%Y-%m-%d %H:%M %Z")
        );
    }
    if let Some(customer) = &notification.customer_name {
        let _ = writeln!(body, "Customer: {}", customer);
    }
    if let Some(total) = notification.total {
        let _ = writeln!(body, "Total:    {:.2}", total);
    }

    let _ = writeln!(body);
    let _ = writeln!(body, "Matched items ({}):", notification.matched_lines.len());
    for line in &notification.matched_lines {
        let _ = write!(body, "  - {}", line.item_id);
        if let Some(name) = &line.name {
            let _ = write!(body, "  {}", name);
        }
        if let Some(units) = line.units {
            let _ = write!(body, "  x{}", units);
        }
        if let Some(price) = line.price {
            let _ = write!(body, "  @ {:.2}", price);
        }
        let _ = writeln!(body);
    }
    body
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    subject_prefix: String,
    timezone: Tz,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings, timezone: Tz) -> Result<Self> {
        let from = parse_mailbox("notification.from", &settings.from)?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| parse_mailbox("notification.recipients", r))
            .collect::<Result<Vec<_>>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| MonitorError::InvalidConfigValueError {
                field: "notification.smtp_host".to_string(),
                value: settings.host.clone(),
                reason: e.to_string(),
            })?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self {
            transport,
            from,
            recipients,
            subject_prefix: settings.subject_prefix.clone(),
            timezone,
        })
    }

    fn build_message(&self, notification: &OrderNotification) -> Result<Message> {
        self.compose(
            &notification.order_id,
            render_subject(&self.subject_prefix, notification),
            render_plain_text(notification, self.timezone),
        )
    }

    fn build_test_message(&self, sent_at: DateTime<Utc>) -> Result<Message> {
        let body = format!(
            "This is a test message from order-monitor.\n\nSent at {}.\nIf you received it, SMTP delivery works.\n",
            sent_at.with_timezone(&self.timezone).format("%Y-%m-%d %H:%M %Z")
        );
        self.compose("-", format!("{} Test message", self.subject_prefix).trim().to_string(), body)
    }

    fn compose(&self, order_id: &str, subject: String, body: String) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        builder.body(body).map_err(|e| MonitorError::NotificationError {
            order_id: order_id.to_string(),
            message: format!("failed to build message: {}", e),
        })
    }

    /// 寄出一封測試信給所有收件人
    pub async fn send_test_message(&self) -> Result<()> {
        let message = self.build_test_message(Utc::now())?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MonitorError::NotificationError {
                order_id: "-".to_string(),
                message: format!("test message not delivered: {}", e),
            })?;
        tracing::info!("📧 Test message sent to {} recipient(s)", self.recipients.len());
        Ok(())
    }
}

fn parse_mailbox(field: &str, raw: &str) -> Result<Mailbox> {
    raw.parse::<Mailbox>()
        .map_err(|e| MonitorError::InvalidConfigValueError {
            field: field.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<()> {
        let message = self.build_message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MonitorError::NotificationError {
                order_id: notification.order_id.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(
            "📧 Sent notification for order {} to {} recipient(s)",
            notification.display_reference(),
            self.recipients.len()
        );
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        let connected = self.transport.test_connection().await.map_err(|e| {
            MonitorError::NotificationError {
                order_id: "-".to_string(),
                message: format!("SMTP connection test failed: {}", e),
            }
        })?;

        if !connected {
            return Err(MonitorError::NotificationError {
                order_id: "-".to_string(),
                message: "SMTP server refused the connection".to_string(),
            });
        }
        Ok(())
    }
}

/// 只記錄郵件內容，不實際寄出
pub struct DryRunNotifier {
    subject_prefix: String,
    timezone: Tz,
    sent: AtomicUsize,
}

impl DryRunNotifier {
    pub fn new(subject_prefix: impl Into<String>, timezone: Tz) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
            timezone,
            sent: AtomicUsize::new(0),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<()> {
        tracing::info!(
            "🧪 [dry-run] {}\n{}",
            render_subject(&self.subject_prefix, notification),
            render_plain_text(notification, self.timezone)
        );
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        tracing::info!("🧪 [dry-run] notifier active, no SMTP connection made");
        Ok(())
    }
}

pub enum ConfiguredNotifier {
    Smtp(SmtpNotifier),
    DryRun(DryRunNotifier),
}

impl ConfiguredNotifier {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, ConfiguredNotifier::DryRun(_))
    }

    pub async fn send_test_message(&self) -> Result<()> {
        match self {
            ConfiguredNotifier::Smtp(notifier) => notifier.send_test_message().await,
            ConfiguredNotifier::DryRun(_) => {
                tracing::info!("🧪 [dry-run] test message not sent");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Notifier for ConfiguredNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<()> {
        match self {
            ConfiguredNotifier::Smtp(notifier) => notifier.notify(notification).await,
            ConfiguredNotifier::DryRun(notifier) => notifier.notify(notification).await,
        }
    }

    async fn test_connection(&self) -> Result<()> {
        match self {
            ConfiguredNotifier::Smtp(notifier) => notifier.test_connection().await,
            ConfiguredNotifier::DryRun(notifier) => notifier.test_connection().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::OrderLine;
    use chrono::TimeZone;
    use chrono_tz::Europe::Madrid;

    fn notification() -> OrderNotification {
        OrderNotification {
            order_id: "65f1c0ffee".to_string(),
            document_number: Some("SO-0042".to_string()),
            created_at: Some(Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap()),
            customer_name: Some("Velo Shop".to_string()),
            total: Some(1299.9),
            matched_lines: vec![OrderLine {
                item_id: "00123".to_string(),
                name: Some("Cairon C 2.0".to_string()),
                units: Some(1.0),
                price: Some(1299.9),
            }],
        }
    }

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "monitor".to_string(),
            password: "hunter2".to_string(),
            from: "monitor@example.com".to_string(),
            recipients: vec!["ops@example.com".to_string(), "Sales <sales@example.com>".to_string()],
            subject_prefix: "[Orders]".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_subject_uses_document_number_and_customer() {
        assert_eq!(
            render_subject("[Orders]", &notification()),
            "[Orders] Order SO-0042 - Velo Shop"
        );

        let mut bare = notification();
        bare.document_number = None;
        bare.customer_name = None;
        assert_eq!(render_subject("", &bare), "Order 65f1c0ffee");
    }

    #[test]
    fn test_plain_text_shows_local_time_and_lines() {
        let body = render_plain_text(&notification(), Madrid);
        assert!(body.contains("Created:  2024-06-10 10:30 CEST"));
        assert!(body.contains("Matched items (1):"));
        assert!(body.contains("00123  Cairon C 2.0  x1  @ 1299.90"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", settings());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_smtp_notifier_builds_message_for_all_recipients() {
        let notifier = SmtpNotifier::new(&settings(), Madrid).unwrap();
        let message = notifier.build_message(&notification()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("sales@example.com"));
        assert!(raw.contains("Subject: [Orders] Order SO-0042 - Velo Shop"));
    }

    #[tokio::test]
    async fn test_test_message_goes_to_all_recipients() {
        let notifier = SmtpNotifier::new(&settings(), Madrid).unwrap();
        let sent_at = Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap();
        let message = notifier.build_test_message(sent_at).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: [Orders] Test message"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("sales@example.com"));
        assert!(raw.contains("2024-06-10 10:30 CEST"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_test_message() {
        let notifier = ConfiguredNotifier::DryRun(DryRunNotifier::new("[Test]", Madrid));
        tokio_test::assert_ok!(notifier.send_test_message().await);
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_config_error() {
        let mut bad = settings();
        bad.recipients = vec!["not an address".to_string()];
        assert!(matches!(
            SmtpNotifier::new(&bad, Madrid),
            Err(MonitorError::InvalidConfigValueError { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_counts_messages() {
        let notifier = DryRunNotifier::new("[Test]", Madrid);
        tokio_test::assert_ok!(notifier.notify(&notification()).await);
        tokio_test::assert_ok!(notifier.test_connection().await);
        assert_eq!(notifier.sent_count(), 1);
    }
}
