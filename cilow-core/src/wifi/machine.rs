//! STA 连接状态机（纯逻辑，不做任何 I/O）

use crate::traits::{RadioEvent, RadioMode};
use std::net::Ipv4Addr;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    StationConnecting,
    StationConnected,
    StationFailed,
    AccessPointActive,
}

/// 对外广播的连接状态事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    StationConnecting,
    StationConnected(Ipv4Addr),
    StationFailed,
    ApStarted,
    ApStopped,
}

/// 状态迁移后需要执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 重新发起 STA 连接
    Connect,
    /// 关闭 DNS 劫持
    StopDns,
    Notify(ConnectivityEvent),
}

/// STA 连接状态机，带有上限固定的重试计数
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    retries: u8,
    max_retries: u8,
    // 最近一次拿到的地址
    address: Option<Ipv4Addr>,
}

impl ConnectionMachine {
    pub fn new(max_retries: u8) -> Self {
        Self {
            state: ConnectionState::Idle,
            retries: 0,
            max_retries,
            address: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// 处理一个无线电事件，`mode` 是事件到达时无线电的工作模式
    pub fn on_event(&mut self, event: &RadioEvent, mode: RadioMode) -> Vec<Action> {
        match event {
            // 只有纯 STA 模式下才自动连接
            RadioEvent::StationStarted if mode == RadioMode::Station => {
                self.state = ConnectionState::StationConnecting;
                vec![
                    Action::Connect,
                    Action::Notify(ConnectivityEvent::StationConnecting),
                ]
            }
            RadioEvent::StationDisconnected if mode == RadioMode::Station => self.on_disconnected(),
            // 已连接且地址没变：只是重复上报
            RadioEvent::GotIp(addr)
                if self.state == ConnectionState::StationConnected && self.address == Some(*addr) =>
            {
                Vec::new()
            }
            RadioEvent::GotIp(addr) => {
                self.retries = 0;
                self.address = Some(*addr);
                self.state = ConnectionState::StationConnected;
                vec![
                    Action::StopDns,
                    Action::Notify(ConnectivityEvent::StationConnected(*addr)),
                ]
            }
            RadioEvent::ApStarted => vec![Action::Notify(ConnectivityEvent::ApStarted)],
            RadioEvent::ApStopped => vec![Action::Notify(ConnectivityEvent::ApStopped)],
            _ => Vec::new(),
        }
    }

    fn on_disconnected(&mut self) -> Vec<Action> {
        match self.state {
            // 失败只通知一次，之后不再自动重试
            ConnectionState::StationFailed => Vec::new(),
            _ if self.retries < self.max_retries => {
                self.retries += 1;
                self.state = ConnectionState::StationConnecting;
                vec![Action::Connect]
            }
            _ => {
                self.state = ConnectionState::StationFailed;
                vec![Action::Notify(ConnectivityEvent::StationFailed)]
            }
        }
    }

    /// 收到新的连接凭据：重置重试计数并进入连接中
    pub fn begin_connect(&mut self) {
        self.retries = 0;
        self.state = ConnectionState::StationConnecting;
    }

    /// 发起连接的无线电操作本身失败，不再等待事件
    pub fn fail_connect(&mut self) {
        self.state = ConnectionState::StationFailed;
    }

    /// 配网模式（AP+STA）已完整建立
    pub fn enter_access_point(&mut self) {
        self.state = ConnectionState::AccessPointActive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STA: RadioMode = RadioMode::Station;

    fn connecting() -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(3);
        machine.on_event(&RadioEvent::StationStarted, STA);
        machine
    }

    #[test]
    fn station_start_issues_connect() {
        let mut machine = ConnectionMachine::new(3);
        let actions = machine.on_event(&RadioEvent::StationStarted, STA);
        assert_eq!(machine.state(), ConnectionState::StationConnecting);
        assert_eq!(
            actions,
            vec![Action::Connect, Action::Notify(ConnectivityEvent::StationConnecting)]
        );
    }

    #[test]
    fn station_start_in_hybrid_mode_does_not_connect() {
        let mut machine = ConnectionMachine::new(3);
        let actions = machine.on_event(&RadioEvent::StationStarted, RadioMode::AccessPointStation);
        assert!(actions.is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn disconnects_below_limit_reconnect() {
        let mut machine = connecting();
        for expected_retry in 1..=3 {
            let actions = machine.on_event(&RadioEvent::StationDisconnected, STA);
            assert_eq!(actions, vec![Action::Connect]);
            assert_eq!(machine.retries(), expected_retry);
            assert_eq!(machine.state(), ConnectionState::StationConnecting);
        }
    }

    #[test]
    fn disconnect_at_limit_fails_exactly_once() {
        let mut machine = connecting();
        for _ in 0..3 {
            machine.on_event(&RadioEvent::StationDisconnected, STA);
        }

        let actions = machine.on_event(&RadioEvent::StationDisconnected, STA);
        assert_eq!(actions, vec![Action::Notify(ConnectivityEvent::StationFailed)]);
        assert_eq!(machine.state(), ConnectionState::StationFailed);

        let again = machine.on_event(&RadioEvent::StationDisconnected, STA);
        assert!(again.is_empty());
        assert_eq!(machine.state(), ConnectionState::StationFailed);
    }

    #[test]
    fn got_ip_resets_retries_from_any_state() {
        let addr = Ipv4Addr::new(10, 0, 0, 7);
        let mut machine = connecting();
        machine.on_event(&RadioEvent::StationDisconnected, STA);
        machine.on_event(&RadioEvent::StationDisconnected, STA);

        let actions = machine.on_event(&RadioEvent::GotIp(addr), STA);
        assert_eq!(machine.retries(), 0);
        assert_eq!(machine.state(), ConnectionState::StationConnected);
        assert_eq!(
            actions,
            vec![Action::StopDns, Action::Notify(ConnectivityEvent::StationConnected(addr))]
        );

        machine.enter_access_point();
        machine.on_event(&RadioEvent::GotIp(addr), RadioMode::AccessPointStation);
        assert_eq!(machine.state(), ConnectionState::StationConnected);
    }

    #[test]
    fn repeated_got_ip_is_reported_once() {
        let addr = Ipv4Addr::new(10, 0, 0, 7);
        let mut machine = connecting();
        machine.on_event(&RadioEvent::GotIp(addr), STA);

        assert!(machine.on_event(&RadioEvent::GotIp(addr), STA).is_empty());
        assert_eq!(machine.state(), ConnectionState::StationConnected);

        // 地址变化仍然通知
        let renewed = Ipv4Addr::new(10, 0, 0, 8);
        assert_eq!(
            machine.on_event(&RadioEvent::GotIp(renewed), STA),
            vec![Action::StopDns, Action::Notify(ConnectivityEvent::StationConnected(renewed))]
        );

        // 断开重连后同一地址也是一次新的连接
        machine.on_event(&RadioEvent::StationDisconnected, STA);
        assert_eq!(machine.on_event(&RadioEvent::GotIp(renewed), STA).len(), 2);
    }

    #[test]
    fn lost_connection_retries_again() {
        let mut machine = connecting();
        machine.on_event(&RadioEvent::GotIp(Ipv4Addr::LOCALHOST), STA);
        let actions = machine.on_event(&RadioEvent::StationDisconnected, STA);
        assert_eq!(actions, vec![Action::Connect]);
        assert_eq!(machine.retries(), 1);
    }

    #[test]
    fn disconnect_outside_station_mode_is_ignored() {
        let mut machine = ConnectionMachine::new(3);
        machine.enter_access_point();
        let actions = machine.on_event(&RadioEvent::StationDisconnected, RadioMode::AccessPointStation);
        assert!(actions.is_empty());
        assert_eq!(machine.state(), ConnectionState::AccessPointActive);
    }

    #[test]
    fn new_credentials_reset_retry_budget() {
        let mut machine = connecting();
        for _ in 0..4 {
            machine.on_event(&RadioEvent::StationDisconnected, STA);
        }
        assert_eq!(machine.state(), ConnectionState::StationFailed);

        machine.begin_connect();
        assert_eq!(machine.retries(), 0);
        let actions = machine.on_event(&RadioEvent::StationDisconnected, STA);
        assert_eq!(actions, vec![Action::Connect]);
    }

    #[test]
    fn failed_connect_request_ends_in_failed_state() {
        let mut machine = ConnectionMachine::new(3);
        machine.enter_access_point();
        machine.begin_connect();
        machine.fail_connect();
        assert_eq!(machine.state(), ConnectionState::StationFailed);
        // 之后的断开不会再触发重试
        assert!(machine.on_event(&RadioEvent::StationDisconnected, STA).is_empty());
    }
}
