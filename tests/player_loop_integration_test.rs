//! 玩家循环集成测试：控制端注册表 ↔ 显示端运行时

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
    use tokio_util::sync::CancellationToken;

    use emu_pilot::config::PlayerPolicy;
    use emu_pilot::core::PlayerError;
    use emu_pilot::display::{key_code, DisplayRuntime, EmulatorDevice};
    use emu_pilot::gateway::{
        Hub, HubConfig, MessageChannel, QueuedChannel, SessionRegistry, WireMessage,
    };
    use emu_pilot::player::{Button, ScriptedOracle};

    #[derive(Default)]
    struct RecordingDevice {
        inputs: Mutex<Vec<(u8, u16, bool)>>,
    }

    impl RecordingDevice {
        fn presses(&self) -> Vec<u16> {
            self.inputs
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, _, pressed)| *pressed)
                .map(|(_, code, _)| *code)
                .collect()
        }
    }

    #[async_trait]
    impl EmulatorDevice for RecordingDevice {
        fn simulate_input(&self, player: u8, key_code: u16, pressed: bool) -> Result<(), PlayerError> {
            self.inputs.lock().unwrap().push((player, key_code, pressed));
            Ok(())
        }

        async fn capture_screenshot(&self) -> Result<String, PlayerError> {
            Ok("data:image/jpeg;base64,/9j/4AAQ".to_string())
        }
    }

    fn fast_policy() -> PlayerPolicy {
        PlayerPolicy {
            screenshot_timeout: Duration::from_secs(2),
            cycle_interval: Duration::from_millis(20),
            press_duration_ms: 10,
            ..PlayerPolicy::default()
        }
    }

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(
            Arc::new(ScriptedOracle::new(vec![Button::A, Button::CUp])),
            fast_policy(),
            "player",
        ))
    }

    async fn wait_for_presses(device: &RecordingDevice, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while device.presses().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("display never received enough presses");
    }

    #[tokio::test]
    async fn test_in_process_play_loop() {
        let registry = registry();
        let device = Arc::new(RecordingDevice::default());

        let (hub_side, mut to_display) = QueuedChannel::new("display-1");
        let (display_side, mut to_hub) = QueuedChannel::new("hub");
        let hub_channel: Arc<dyn MessageChannel> = hub_side.clone();
        let runtime = DisplayRuntime::new(device.clone(), display_side.clone());

        // 控制端 → 显示端
        tokio::spawn(async move {
            while let Some(text) = to_display.recv().await {
                let _ = runtime.handle_text(&text).await;
            }
        });
        // 显示端 → 控制端
        let pump_registry = Arc::clone(&registry);
        let pump_channel = Arc::clone(&hub_channel);
        tokio::spawn(async move {
            while let Some(text) = to_hub.recv().await {
                pump_registry.handle_text(&pump_channel, &text).await;
            }
        });

        display_side.send(WireMessage::BeginPlay).unwrap();
        wait_for_presses(&device, 2).await;

        let presses = device.presses();
        assert_eq!(presses[0], key_code(Button::A));
        assert_eq!(presses[1], key_code(Button::CUp));
        assert_eq!(registry.active_count().await, 1);

        display_side.send(WireMessage::EndPlay).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_count().await, 0);
        assert!(registry.session("display-1").await.is_none());
    }

    #[tokio::test]
    async fn test_websocket_hub_end_to_end() {
        let hub = Hub::new(
            HubConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                max_connections: 4,
            },
            registry(),
        );
        let listener = hub.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let hub = Arc::new(hub);
        let server = {
            let hub = Arc::clone(&hub);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { hub.serve(listener, shutdown).await })
        };

        let (ws_stream, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (display_side, mut outbound) = QueuedChannel::new("hub");
        let device = Arc::new(RecordingDevice::default());
        let runtime = DisplayRuntime::new(device.clone(), display_side.clone());

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });
        let reader = tokio::spawn(async move {
            while let Some(Ok(WsMessage::Text(text))) = ws_rx.next().await {
                let _ = runtime.handle_text(&text).await;
            }
        });

        display_side.send(WireMessage::BeginPlay).unwrap();
        wait_for_presses(&device, 1).await;
        assert_eq!(hub.registry().active_count().await, 1);
        assert_eq!(hub.connection_count(), 1);

        // 断开连接（两半都释放）后会话被停止并移除
        writer.abort();
        reader.abort();
        let _ = writer.await;
        let _ = reader.await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.registry().active_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        server.await.unwrap();
    }
}
