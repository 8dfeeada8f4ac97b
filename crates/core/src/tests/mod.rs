pub mod default;

use crate::session::PeerSession;
use crate::session::SessionConfig;

#[allow(dead_code)]
pub fn setup_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Drive two sessions through the out-of-band handshake the way a
/// rendezvous would relay it, returning (initiator, answerer).
pub async fn establish_pair() -> (PeerSession, PeerSession) {
    let a = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    let b = PeerSession::new(SessionConfig::default()).await.unwrap();

    let offer = a.handshake(None).await.unwrap().expect("offer payload");
    let answer = b
        .handshake(Some(&offer))
        .await
        .unwrap()
        .expect("answer payload");
    a.handshake(Some(&answer)).await.unwrap();

    (a, b)
}
