//! 告警流权限与安全角色常量
//!
//! 权限的存储与解析由外部授权服务负责，核心只消费其快照。

/// 系统预定义权限
pub mod alert_permissions {
    /// 接收实时告警推送（订阅与每次投递的准入条件）
    pub const ALERTS_RECEIVE: &str = "alerts:receive";
    /// 确认告警
    pub const ALERTS_ACKNOWLEDGE: &str = "alerts:acknowledge";
    /// 升级告警
    pub const ALERTS_ESCALATE: &str = "alerts:escalate";
    /// 忽略告警
    pub const ALERTS_DISMISS: &str = "alerts:dismiss";
}

/// 系统预定义安全角色
pub mod security_roles {
    /// 门店保安
    pub const SECURITY_GUARD: &str = "security_guard";
    /// 门店经理
    pub const STORE_MANAGER: &str = "store_manager";
    /// 区域督导
    pub const REGIONAL_SUPERVISOR: &str = "regional_supervisor";
}
