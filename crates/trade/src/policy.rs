use joule_core::trade::entity::FlowDirection;
use joule_core::trade::port::TradeError;
use rust_decimal::Decimal;

/// 电量百分比的持久化精度 (小数位)
pub const LEVEL_SCALE: u32 = 12;

/// 能量比较与上报的精度 (kWh 小数位)
pub const ENERGY_SCALE: u32 = 6;

/// # Summary
/// 容量策略：根据当前电量计算一笔充放电之后的新电量百分比。纯函数，无副作用。
///
/// # Logic
/// 1. `quantity` 与 `capacity` 必须为正，否则 `InvalidInput`。
/// 2. 当前存量 = level / 100 × capacity，所有比较都在 `ENERGY_SCALE` 精度下进行。
/// 3. 充电方向：quantity 超过剩余可充入能量时 `InsufficientCapacity`。
/// 4. 放电方向：quantity 超过当前存量时 `InsufficientEnergy`。
/// 5. 新存量在该精度下触及容量或归零时分别落在 100 / 0，其余按 `LEVEL_SCALE` 舍入。
///
/// # Arguments
/// * `current_level`: 当前电量百分比。
/// * `capacity`: 电池容量 (kWh)。
/// * `quantity`: 请求的能量 (kWh)。
/// * `flow`: 能量流向。
///
/// # Returns
/// 新的电量百分比，始终落在 `[0, 100]`。数值溢出返回 `InvalidInput`，不会 panic。
pub fn plan(
    current_level: Decimal,
    capacity: Decimal,
    quantity: Decimal,
    flow: FlowDirection,
) -> Result<Decimal, TradeError> {
    if quantity <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    if capacity <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(format!(
            "battery capacity must be positive, got {}",
            capacity
        )));
    }

    let overflow = || {
        TradeError::InvalidInput(format!(
            "{} kWh against a {} kWh battery at {}% is out of range",
            quantity, capacity, current_level
        ))
    };
    let current_energy = current_level
        .checked_div(Decimal::ONE_HUNDRED)
        .and_then(|ratio| ratio.checked_mul(capacity))
        .ok_or_else(overflow)?;
    let requested = quantity.round_dp(ENERGY_SCALE);

    let new_energy = match flow {
        FlowDirection::Charge => {
            let remaining = capacity
                .checked_sub(current_energy)
                .ok_or_else(overflow)?
                .round_dp(ENERGY_SCALE);
            if requested > remaining {
                return Err(TradeError::InsufficientCapacity {
                    requested: quantity,
                    available: remaining,
                });
            }
            current_energy.checked_add(quantity).ok_or_else(overflow)?
        }
        FlowDirection::Discharge => {
            let available = current_energy.round_dp(ENERGY_SCALE);
            if requested > available {
                return Err(TradeError::InsufficientEnergy {
                    requested: quantity,
                    available,
                });
            }
            current_energy.checked_sub(quantity).ok_or_else(overflow)?
        }
    };

    let settled = new_energy.round_dp(ENERGY_SCALE);
    if settled >= capacity.round_dp(ENERGY_SCALE) {
        return Ok(Decimal::ONE_HUNDRED);
    }
    if settled <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let level = new_energy
        .checked_div(capacity)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or_else(overflow)?;
    Ok(level
        .round_dp(LEVEL_SCALE)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED))
}
