//! Coin selection for unshielded transactions.
//!
//! Turns signed per-token imbalances into a concrete set of inputs and change
//! outputs. Pure: no ledger state is touched here; the wallet spends the
//! selected coins afterwards.
//!
//! # Algorithm
//!
//! Token types are balanced independently, every non-native type first (in
//! token-type order) and the native fee token last, because inputs and change
//! outputs added for other types still have to be paid for in the native token.
//!
//! - deficit (negative imbalance): accumulate coins until the running total covers it
//! - surplus (positive imbalance): emit a change output for the surplus
//! - native token: the effective deficit grows by `input_fee_overhead` for every input
//!   selected so far (any type) and by `output_fee_overhead` for every change output,
//!   including the native change itself once a leftover appears
//!
//! Selection for a type stops as soon as the running total covers the
//! effective deficit, so remaining coins of that type are never touched.
//!
//! # Determinism
//!
//! Candidates of one type are traversed smallest value first. Equal values
//! keep the order in which the caller supplied them.
//!
//! # Failure modes
//!
//! - Running out of coins for a deficit fails with `InsufficientFunds`.
//! - A native leftover that cannot pay for its own change output keeps
//!   selection going; with no coins left this is `InsufficientFunds` as well.
//! - Arithmetic overflow fails with `Overflow`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BalanceError;
use crate::ledger::{TokenType, UtxoWithMeta};

/// Signed value delta per token type; negative means more input is needed.
pub type Imbalances = BTreeMap<TokenType, i128>;

/// Anything the selector can spend.
pub trait Coin {
    fn token_type(&self) -> &TokenType;
    fn value(&self) -> u128;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedCoin {
    pub token_type: TokenType,
    pub value: u128,
}

impl Coin for QualifiedCoin {
    fn token_type(&self) -> &TokenType {
        &self.token_type
    }

    fn value(&self) -> u128 {
        self.value
    }
}

impl Coin for UtxoWithMeta {
    fn token_type(&self) -> &TokenType {
        &self.utxo.token_type
    }

    fn value(&self) -> u128 {
        self.utxo.value
    }
}

/// Per-item fee overheads, denominated in the native token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostModel {
    pub input_fee_overhead: u128,
    pub output_fee_overhead: u128,
}

impl CostModel {
    /// Fee for a given number of inputs and outputs.
    pub fn fee_for(&self, inputs: usize, outputs: usize) -> Result<u128, BalanceError> {
        let inputs_fee = mul_count(self.input_fee_overhead, inputs, "pricing inputs")?;
        let outputs_fee = mul_count(self.output_fee_overhead, outputs, "pricing outputs")?;
        checked_add(inputs_fee, outputs_fee, "adding input and output fees")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutput {
    pub token_type: TokenType,
    pub value: u128,
}

/// Inputs to add and change outputs to create so the transaction balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecipe<C> {
    pub inputs: Vec<C>,
    pub outputs: Vec<ChangeOutput>,
}

impl<C> Default for BalanceRecipe<C> {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Select inputs and change outputs that close every imbalance and pay the
/// native-token fee overheads.
pub fn balance_transaction<C: Coin + Clone>(
    coins: &[C],
    imbalances: &Imbalances,
    cost_model: &CostModel,
    native_token: &TokenType,
) -> Result<BalanceRecipe<C>, BalanceError> {
    let mut recipe = BalanceRecipe::default();

    for (token_type, imbalance) in imbalances {
        if token_type == native_token {
            continue;
        }
        balance_token(coins, token_type, *imbalance, &mut recipe)?;
    }

    let native_imbalance = imbalances.get(native_token).copied().unwrap_or(0);
    balance_native(coins, native_token, native_imbalance, cost_model, &mut recipe)?;

    Ok(recipe)
}

/// Candidates of one token type, smallest first; stable for equal values.
fn candidates_for<'a, C: Coin>(coins: &'a [C], token_type: &TokenType) -> Vec<&'a C> {
    let mut candidates: Vec<&C> = coins
        .iter()
        .filter(|coin| coin.token_type() == token_type)
        .collect();
    candidates.sort_by_key(|coin| coin.value());
    candidates
}

fn balance_token<C: Coin + Clone>(
    coins: &[C],
    token_type: &TokenType,
    imbalance: i128,
    recipe: &mut BalanceRecipe<C>,
) -> Result<(), BalanceError> {
    match imbalance.cmp(&0) {
        Ordering::Equal => Ok(()),
        Ordering::Greater => {
            recipe.outputs.push(ChangeOutput {
                token_type: token_type.clone(),
                value: imbalance.unsigned_abs(),
            });
            Ok(())
        }
        Ordering::Less => {
            let deficit = imbalance.unsigned_abs();
            let mut accumulated = 0u128;

            for coin in candidates_for(coins, token_type) {
                if accumulated >= deficit {
                    break;
                }
                accumulated = checked_add(accumulated, coin.value(), "accumulating inputs")?;
                recipe.inputs.push(coin.clone());
            }

            match accumulated.cmp(&deficit) {
                Ordering::Less => Err(BalanceError::InsufficientFunds {
                    token_type: token_type.clone(),
                    missing: deficit - accumulated,
                }),
                Ordering::Equal => Ok(()),
                Ordering::Greater => {
                    recipe.outputs.push(ChangeOutput {
                        token_type: token_type.clone(),
                        value: accumulated - deficit,
                    });
                    Ok(())
                }
            }
        }
    }
}

fn balance_native<C: Coin + Clone>(
    coins: &[C],
    native_token: &TokenType,
    imbalance: i128,
    cost_model: &CostModel,
    recipe: &mut BalanceRecipe<C>,
) -> Result<(), BalanceError> {
    let declared_deficit = if imbalance < 0 {
        imbalance.unsigned_abs()
    } else {
        0
    };
    // Fees for what the other token types already added.
    let base = checked_add(
        declared_deficit,
        cost_model.fee_for(recipe.inputs.len(), recipe.outputs.len())?,
        "computing the native deficit",
    )?;

    let mut accumulated = if imbalance > 0 {
        imbalance.unsigned_abs()
    } else {
        0
    };
    let mut selected = 0usize;
    let mut candidates = candidates_for(coins, native_token).into_iter();

    loop {
        let needed = checked_add(
            base,
            mul_count(cost_model.input_fee_overhead, selected, "pricing native inputs")?,
            "computing the native deficit",
        )?;
        let needed_with_change = checked_add(
            needed,
            cost_model.output_fee_overhead,
            "pricing the native change output",
        )?;

        if accumulated == needed {
            return Ok(());
        }
        if accumulated >= needed_with_change {
            let change = accumulated - needed_with_change;
            if change > 0 {
                recipe.outputs.push(ChangeOutput {
                    token_type: native_token.clone(),
                    value: change,
                });
            }
            return Ok(());
        }

        let Some(coin) = candidates.next() else {
            let target = if accumulated < needed {
                needed
            } else {
                needed_with_change
            };
            return Err(BalanceError::InsufficientFunds {
                token_type: native_token.clone(),
                missing: target - accumulated,
            });
        };

        accumulated = checked_add(accumulated, coin.value(), "accumulating native inputs")?;
        selected += 1;
        recipe.inputs.push(coin.clone());
    }
}

fn checked_add(left: u128, right: u128, context: &str) -> Result<u128, BalanceError> {
    left.checked_add(right)
        .ok_or_else(|| BalanceError::Overflow(context.to_string()))
}

fn mul_count(amount: u128, count: usize, context: &str) -> Result<u128, BalanceError> {
    let count = u128::try_from(count).map_err(|_| BalanceError::Overflow(context.to_string()))?;
    amount
        .checked_mul(count)
        .ok_or_else(|| BalanceError::Overflow(context.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT_FEE: u128 = 7;
    const OUTPUT_FEE: u128 = 11;

    fn native() -> TokenType {
        TokenType::from_bytes([0u8; 32])
    }

    fn custom() -> TokenType {
        TokenType::from_bytes([1u8; 32])
    }

    fn coin(token_type: &TokenType, value: u128) -> QualifiedCoin {
        QualifiedCoin {
            token_type: token_type.clone(),
            value,
        }
    }

    fn fees() -> CostModel {
        CostModel {
            input_fee_overhead: INPUT_FEE,
            output_fee_overhead: OUTPUT_FEE,
        }
    }

    fn deficit(token_type: &TokenType, amount: i128) -> Imbalances {
        Imbalances::from([(token_type.clone(), -amount)])
    }

    #[test]
    fn exact_native_coin_covers_deficit_and_input_fee() {
        let exact = coin(&native(), 1000 + INPUT_FEE);
        let recipe =
            balance_transaction(&[exact.clone()], &deficit(&native(), 1000), &fees(), &native())
                .expect("balances");

        assert_eq!(recipe.inputs, vec![exact]);
        assert!(recipe.outputs.is_empty());
    }

    #[test]
    fn change_that_cannot_pay_for_itself_is_insufficient() {
        let small = coin(&native(), INPUT_FEE + 5);
        let err = balance_transaction(
            &[small],
            &deficit(&native(), 5 + i128::try_from(OUTPUT_FEE).expect("fits")),
            &fees(),
            &native(),
        )
        .expect_err("must fail");

        assert!(matches!(
            err,
            BalanceError::InsufficientFunds { ref token_type, .. } if *token_type == native()
        ));
    }

    #[test]
    fn balances_two_token_types_independently() {
        let coins = vec![
            coin(&native(), 10),
            coin(&native(), 20),
            coin(&native(), 30),
            coin(&custom(), 1),
            coin(&custom(), 2),
            coin(&custom(), 3),
        ];
        let imbalances = Imbalances::from([(custom(), -4), (native(), -6)]);

        let recipe = balance_transaction(&coins, &imbalances, &CostModel::default(), &native())
            .expect("balances");

        assert_eq!(recipe.inputs.len(), 4);
        assert_eq!(recipe.outputs.len(), 2);
        assert_eq!(
            recipe.outputs,
            vec![
                ChangeOutput {
                    token_type: custom(),
                    value: 2
                },
                ChangeOutput {
                    token_type: native(),
                    value: 4
                },
            ]
        );
    }

    #[test]
    fn single_exact_coin_is_short_once_input_fee_applies() {
        let err = balance_transaction(
            &[coin(&native(), 1_000_000)],
            &deficit(&native(), 1_000_000),
            &fees(),
            &native(),
        )
        .expect_err("fee makes it short");

        assert_eq!(
            err,
            BalanceError::InsufficientFunds {
                token_type: native(),
                missing: INPUT_FEE,
            }
        );
    }

    #[test]
    fn never_selects_more_than_needed() {
        let coins = vec![
            coin(&custom(), 5),
            coin(&custom(), 5),
            coin(&custom(), 5),
            coin(&custom(), 5),
        ];
        let recipe = balance_transaction(
            &coins,
            &deficit(&custom(), 10),
            &CostModel::default(),
            &native(),
        )
        .expect("balances");

        assert_eq!(recipe.inputs.len(), 2);
        assert!(recipe.outputs.is_empty());
    }

    #[test]
    fn non_native_inputs_are_paid_in_native_token() {
        let coins = vec![coin(&custom(), 4), coin(&native(), 100)];
        let recipe = balance_transaction(&coins, &deficit(&custom(), 4), &fees(), &native())
            .expect("balances");

        // custom input + native input, one native change output
        let expected_change = 100 - 2 * INPUT_FEE - OUTPUT_FEE;
        assert_eq!(recipe.inputs.len(), 2);
        assert_eq!(
            recipe.outputs,
            vec![ChangeOutput {
                token_type: native(),
                value: expected_change
            }]
        );
    }

    #[test]
    fn missing_custom_coins_name_the_custom_token() {
        let coins = vec![coin(&custom(), 1), coin(&native(), 100)];
        let err = balance_transaction(&coins, &deficit(&custom(), 3), &fees(), &native())
            .expect_err("short on custom");

        assert_eq!(
            err,
            BalanceError::InsufficientFunds {
                token_type: custom(),
                missing: 2,
            }
        );
    }

    #[test]
    fn surplus_becomes_change_without_inputs() {
        let imbalances = Imbalances::from([(custom(), 9)]);
        let recipe = balance_transaction::<QualifiedCoin>(
            &[],
            &imbalances,
            &CostModel::default(),
            &native(),
        )
        .expect("balances");

        assert!(recipe.inputs.is_empty());
        assert_eq!(
            recipe.outputs,
            vec![ChangeOutput {
                token_type: custom(),
                value: 9
            }]
        );
    }

    #[test]
    fn native_surplus_pays_fees_before_coins_are_used() {
        let imbalances = Imbalances::from([(native(), 50)]);
        let recipe = balance_transaction(&[coin(&native(), 1_000)], &imbalances, &fees(), &native())
            .expect("balances");

        assert!(recipe.inputs.is_empty());
        assert_eq!(
            recipe.outputs,
            vec![ChangeOutput {
                token_type: native(),
                value: 50 - OUTPUT_FEE
            }]
        );
    }

    #[test]
    fn leftover_below_output_fee_pulls_another_coin() {
        // 1000 + fee leaves 3 over the deficit; a change output would cost more.
        let coins = vec![coin(&native(), 1003 + INPUT_FEE), coin(&native(), 2000)];
        let recipe = balance_transaction(&coins, &deficit(&native(), 1000), &fees(), &native())
            .expect("balances");

        assert_eq!(recipe.inputs.len(), 2);
        let paid = 1003 + INPUT_FEE + 2000;
        let expected_change = paid - 1000 - 2 * INPUT_FEE - OUTPUT_FEE;
        assert_eq!(recipe.outputs[0].value, expected_change);
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct LabeledCoin {
        label: &'static str,
        token_type: TokenType,
        value: u128,
    }

    impl Coin for LabeledCoin {
        fn token_type(&self) -> &TokenType {
            &self.token_type
        }

        fn value(&self) -> u128 {
            self.value
        }
    }

    #[test]
    fn equal_values_keep_caller_order() {
        let labeled = |label, value| LabeledCoin {
            label,
            token_type: custom(),
            value,
        };
        let coins = vec![labeled("b", 5), labeled("a", 5), labeled("c", 1)];
        let recipe = balance_transaction(
            &coins,
            &deficit(&custom(), 6),
            &CostModel::default(),
            &native(),
        )
        .expect("balances");

        let labels: Vec<_> = recipe.inputs.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["c", "b"]);
    }

    #[test]
    fn overflowing_fee_is_reported() {
        let cost = CostModel {
            input_fee_overhead: u128::MAX,
            output_fee_overhead: 0,
        };
        let coins = vec![coin(&custom(), 1), coin(&custom(), 1)];
        let err = balance_transaction(&coins, &deficit(&custom(), 2), &cost, &native())
            .expect_err("overflow");
        assert!(matches!(err, BalanceError::Overflow(_)));
    }
}
