//! WiFi station bring-up and the embassy-net runner.

use embassy_net::Stack;
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiError};

use crate::link::{LINK_CHECK_INTERVAL, LinkStatus, LinkSupervisor, Sleep, Station};
use crate::mqtt::session::NETWORK_READY;

/// Longest wait for a DHCP lease once associated.
const DHCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Embassy-net runner task: processes packets, DHCP and DNS for the stack.
#[embassy_executor::task]
pub async fn net_runner_task(mut runner: embassy_net::Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

impl Station for WifiController<'static> {
    type Error = WifiError;

    fn is_connected(&mut self) -> bool {
        WifiController::is_connected(self).unwrap_or(false)
    }

    fn connect(&mut self) -> Result<(), WifiError> {
        WifiController::connect(self).inspect_err(|e| error!("wifi: connect failed: {:?}", e))
    }
}

struct EmbassySleep;

impl Sleep for EmbassySleep {
    async fn sleep(&mut self, duration: core::time::Duration) {
        Timer::after(Duration::from_millis(duration.as_millis() as u64)).await
    }
}

async fn wait_for_address(stack: &Stack<'static>) -> bool {
    info!("network: waiting for DHCP lease...");
    if with_timeout(DHCP_TIMEOUT, stack.wait_config_up()).await.is_err() {
        warn!("network: no DHCP lease yet");
        return false;
    }
    if let Some(config) = stack.config_v4() {
        info!(
            "network: got IP {}, gateway: {}, DNS: {:?}",
            config.address, config.gateway, config.dns_servers
        );
    }
    true
}

/// WiFi task: joins the configured network, signals [`NETWORK_READY`] once
/// DHCP has handed out an address, and keeps re-issuing `connect` every
/// supervision period while the link is down.
#[embassy_executor::task]
pub async fn wifi_task(
    mut wifi: WifiController<'static>,
    client_config: ClientConfig,
    stack: &'static Stack<'static>,
) {
    if let Err(e) = wifi.set_config(&ModeConfig::Client(client_config)) {
        error!("wifi: set_config failed: {:?}", e);
        return;
    }

    if let Err(e) = wifi.start() {
        error!("wifi: start failed: {:?}", e);
        return;
    }
    info!("wifi: started STA mode");

    let mut supervisor = LinkSupervisor::new();
    let mut addressed = false;
    loop {
        if supervisor.check(&mut wifi, &mut EmbassySleep).await == LinkStatus::Down {
            continue;
        }
        if !addressed && wait_for_address(stack).await {
            addressed = true;
            NETWORK_READY.signal(());
        }
        EmbassySleep.sleep(LINK_CHECK_INTERVAL).await;
    }
}
