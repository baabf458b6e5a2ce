use env_logger::{Builder, Env};
use gpreg::kernels::Matern52Kernel;
use gpreg::GaussianProcess;
use linfa::prelude::*;
use ndarray::{arr2, concatenate, Array, Array1, Array2, Axis};

fn xsinx(x: &Array2<f64>) -> Array1<f64> {
    ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
}

fn main() {
    let env = Env::new().filter_or("GPREG_LOG", "info");
    Builder::from_env(env).init();

    let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
    let yt = xsinx(&xt);

    println!("Train GP model of 'xsinx' at {}", xt.column(0));
    let kernel = Matern52Kernel::new(1, 5.0, 100.0).expect("valid kernel");
    let gp = GaussianProcess::params(kernel)
        .noise_variance(1e-4)
        .seed(42)
        .fit(&Dataset::new(xt, yt))
        .expect("GP fitting");
    println!("{gp}");

    let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
    let ytest = xsinx(&xtest);
    // predict values and standard deviation of noisy observations
    let (ypred, yvar) = gp.predict(&xtest, false).expect("GP prediction");
    let ysigma = yvar.into_diag().mapv(|v| v.sqrt());

    println!("Compute prediction errors (x, err(x), sigma(x))");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest,
            (ypred - ytest).insert_axis(Axis(1)),
            ysigma.insert_axis(Axis(1))
        ]
    );

    let trajs = gp
        .sample_posterior(&xtest, 3)
        .expect("GP posterior sampling");
    println!("Posterior trajectories (x, f1(x), f2(x), f3(x))");
    println!("{}", concatenate![Axis(1), xtest, trajs]);
}
