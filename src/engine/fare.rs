//! Fare and commission arithmetic. Pure and stateless, safe to call from
//! any task without synchronization.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fare {
    pub final_fare: f64,
    pub commission: f64,
    pub driver_amount: f64,
}

/// Fare from distance: base = distance x rate, discount comes off before
/// the commission split.
pub fn compute(
    distance_km: f64,
    base_rate_per_km: f64,
    commission_percent: f64,
    discount: f64,
) -> Fare {
    let base = distance_km * base_rate_per_km;
    let total = (base - discount).max(0.0);
    split(total, commission_percent)
}

/// Commission split over an already-settled total, used when the caller
/// supplies an explicit final fare at completion.
pub fn split(total: f64, commission_percent: f64) -> Fare {
    let final_fare = round_cents(total);
    let commission = round_cents(final_fare * commission_percent / 100.0);
    Fare {
        final_fare,
        commission,
        driver_amount: round_cents(final_fare - commission),
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{compute, split};

    #[test]
    fn ten_km_at_two_per_km_with_twelve_percent_commission() {
        let fare = compute(10.0, 2.0, 12.0, 0.0);
        assert_eq!(fare.final_fare, 20.00);
        assert_eq!(fare.commission, 2.40);
        assert_eq!(fare.driver_amount, 17.60);
    }

    #[test]
    fn discount_comes_off_before_commission() {
        let fare = compute(10.0, 2.0, 12.0, 5.0);
        assert_eq!(fare.final_fare, 15.00);
        assert_eq!(fare.commission, 1.80);
        assert_eq!(fare.driver_amount, 13.20);
    }

    #[test]
    fn discount_never_drives_the_fare_negative() {
        let fare = compute(1.0, 2.0, 12.0, 100.0);
        assert_eq!(fare.final_fare, 0.0);
        assert_eq!(fare.commission, 0.0);
        assert_eq!(fare.driver_amount, 0.0);
    }

    #[test]
    fn split_rounds_to_cents() {
        let fare = split(10.0, 12.5);
        assert_eq!(fare.final_fare, 10.00);
        assert_eq!(fare.commission, 1.25);
        assert_eq!(fare.driver_amount, 8.75);

        let odd = split(9.99, 12.0);
        assert_eq!(odd.commission, 1.20);
        assert_eq!(odd.driver_amount, 8.79);
    }
}
