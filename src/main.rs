use anyhow::Context;
use omni_tensor::functional::to_f64_vec;
use omni_tensor::{Value, args, handler};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let handler = handler();
    let names = handler.registry().names();
    println!("registered backends: {}", names.join(", "));

    for name in &names {
        let isolated = handler
            .with_backend(name)
            .with_context(|| format!("loading backend {name}"))?;
        let x = isolated.call("asarray", args![vec![vec![1.0, 2.0], vec![3.0, 4.0]]; dtype = "float32"])?;
        let w = isolated.call("ones", args![vec![3usize, 2]; dtype = "float32"])?;
        let y = isolated.call("layers.linear", args![x, w, 0.5])?;
        let Value::Array(y) = y else {
            anyhow::bail!("{name}: layers.linear returned {}", y.type_label());
        };
        println!(
            "{} (v{}): linear -> shape {:?}, values {:?}",
            isolated.key(),
            isolated.backend().version(),
            y.shape(),
            to_f64_vec(&y)?
        );
    }
    Ok(())
}
