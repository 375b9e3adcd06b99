use std::{sync::Arc, time::Duration};

use switchyard::{BranchRunner, Fleet, SeedSequence, WeightTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chain {
    Browse,
    AddToCart,
    Checkout,
    Bounce,
}

impl Chain {
    async fn run(self) -> Result<(), String> {
        // Stand-in for the real action chain
        let pause = match self {
            Chain::Browse => 5,
            Chain::AddToCart => 10,
            Chain::Checkout => 25,
            Chain::Bounce => 1,
        };
        tokio::time::sleep(Duration::from_millis(pause)).await;
        if self == Chain::Checkout && rand::random::<f64>() < 0.02 {
            return Err("payment gateway timeout".into());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    // 60% browse, 25% add to cart, 10% checkout, the remaining 5% bounce.
    // Built once, before any load is generated: a typo here fails right away.
    let table = Arc::new(
        WeightTable::with_fallback(
            vec![
                (60.0, Chain::Browse),
                (25.0, Chain::AddToCart),
                (10.0, Chain::Checkout),
            ],
            Chain::Bounce,
        )
        .unwrap(),
    );

    // Failures come back untouched: logged below for one user, counted by the fleet
    let executor = Arc::new(|chain: &Chain| {
        let chain = *chain;
        async move { chain.run().await }
    });

    // A single virtual user, replayable from its seed
    let runner = BranchRunner::builder().name("checkout_mix").build();
    let mut source = SeedSequence::new(2024).source(0);
    for _ in 0..5 {
        let outcome = runner
            .run(table.as_ref(), &mut source, executor.as_ref())
            .await
            .unwrap();
        if let Err(e) = outcome {
            tracing::warn!("Action failed: {e}");
        }
    }

    // The whole population
    let tally = Fleet::builder()
        .contexts(500)
        .iterations(20)
        .seed(2024)
        .build()
        .run(table.clone(), executor)
        .await
        .unwrap();

    for (((option, expected), observed), failed) in table
        .options()
        .iter()
        .zip(table.probabilities())
        .zip(tally.frequencies())
        .zip(tally.failures())
    {
        println!(
            "{:<10} expected {:>5.1}%  observed {:>5.1}%  failed {failed}",
            format!("{:?}", option.action),
            expected * 100.0,
            observed * 100.0
        );
    }
}
